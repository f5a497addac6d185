//! Application state the tools mutate and the UI renders.

#[cfg(test)]
use mockall::automock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Pages of the clinic app the assistant can navigate to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Section {
    #[default]
    Home,
    Services,
    Appointments,
    Patients,
    Settings,
}

impl Section {
    pub const ALL: [Section; 5] = [
        Section::Home,
        Section::Services,
        Section::Appointments,
        Section::Patients,
        Section::Settings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Home => "home",
            Section::Services => "services",
            Section::Appointments => "appointments",
            Section::Patients => "patients",
            Section::Settings => "settings",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|section| section.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields of the contact form the assistant can fill in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FormField {
    Name,
    Email,
    Phone,
    Message,
}

impl FormField {
    pub const ALL: [FormField; 4] = [
        FormField::Name,
        FormField::Email,
        FormField::Phone,
        FormField::Message,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FormField::Name => "name",
            FormField::Email => "email",
            FormField::Phone => "phone",
            FormField::Message => "message",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|field| field.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for FormField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Setters the tool dispatcher drives. Mutations must be visible as soon as
/// the call returns.
#[cfg_attr(test, automock)]
pub trait UiStateSink: Send + Sync {
    fn set_active_section(&self, section: Section);
    fn set_field_value(&self, field: FormField, value: String);
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppState {
    pub active_section: Section,
    pub form: BTreeMap<FormField, String>,
}

impl AppState {
    pub fn field(&self, field: FormField) -> Option<&str> {
        self.form.get(&field).map(String::as_str)
    }
}

/// [`AppState`] behind a watch channel, so renderers are notified of every change.
#[derive(Clone)]
pub struct SharedAppState {
    tx: Arc<watch::Sender<AppState>>,
}

impl SharedAppState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AppState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> AppState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.tx.subscribe()
    }
}

impl Default for SharedAppState {
    fn default() -> Self {
        Self::new()
    }
}

impl UiStateSink for SharedAppState {
    fn set_active_section(&self, section: Section) {
        self.tx.send_modify(|state| state.active_section = section);
    }

    fn set_field_value(&self, field: FormField, value: String) {
        self.tx.send_modify(|state| {
            state.form.insert(field, value);
        });
    }
}
