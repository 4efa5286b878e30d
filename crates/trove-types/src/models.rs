use serde::{Deserialize, Serialize};

/// Account roles, ordered by privilege. `MainAdmin` is held only by the
/// first-ever registered account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Admin,
    MainAdmin,
}

/// Actions gated by role. Every admin route resolves to exactly one
/// capability, checked before any database write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Verify or reject pending accounts.
    ModerateUsers,
    /// Approve or reject posted items.
    ModerateItems,
    /// Approve or reject staged email/phone changes.
    ReviewChanges,
    /// Promote, demote, or remove accounts.
    ManageRoles,
    /// Permanently remove items and their chat history.
    RemoveItems,
    /// Read any item chat without being a participant.
    MonitorChats,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Admin => "admin",
            Role::MainAdmin => "main_admin",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "student" => Some(Role::Student),
            "admin" => Some(Role::Admin),
            "main_admin" => Some(Role::MainAdmin),
            _ => None,
        }
    }

    /// The single policy point for role checks.
    pub fn can(self, cap: Capability) -> bool {
        match cap {
            Capability::ModerateUsers | Capability::ModerateItems | Capability::ReviewChanges => {
                matches!(self, Role::Admin | Role::MainAdmin)
            }
            Capability::ManageRoles | Capability::RemoveItems | Capability::MonitorChats => {
                matches!(self, Role::MainAdmin)
            }
        }
    }
}

/// Item lifecycle: `Pending -> Approved -> Claimed -> Resolved`.
/// Items posted by admins skip `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Approved,
    Claimed,
    Resolved,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Approved => "approved",
            ItemStatus::Claimed => "claimed",
            ItemStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<ItemStatus> {
        match s {
            "pending" => Some(ItemStatus::Pending),
            "approved" => Some(ItemStatus::Approved),
            "claimed" => Some(ItemStatus::Claimed),
            "resolved" => Some(ItemStatus::Resolved),
            _ => None,
        }
    }
}

/// What kind of contact detail a staged change replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Email,
    Phone,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Email => "email",
            ChangeKind::Phone => "phone",
        }
    }

    pub fn parse(s: &str) -> Option<ChangeKind> {
        match s {
            "email" => Some(ChangeKind::Email),
            "phone" => Some(ChangeKind::Phone),
            _ => None,
        }
    }
}

/// Login accepts an email, a phone number, or a username, disambiguated
/// by shape: `@` present means email, all-digits of length >= 10 means
/// phone, anything else is a username.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginIdentifier {
    Email(String),
    Phone(String),
    Username(String),
}

impl LoginIdentifier {
    pub fn classify(raw: &str) -> LoginIdentifier {
        let raw = raw.trim();
        if raw.contains('@') {
            LoginIdentifier::Email(raw.to_ascii_lowercase())
        } else if raw.len() >= 10 && raw.chars().all(|c| c.is_ascii_digit()) {
            LoginIdentifier::Phone(raw.to_string())
        } else {
            LoginIdentifier::Username(raw.to_string())
        }
    }
}

/// Minimal email shape check: something, `@`, something, `.`, something.
pub fn valid_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

/// Phone numbers are exactly 10 digits.
pub fn valid_phone(s: &str) -> bool {
    s.len() == 10 && s.chars().all(|c| c.is_ascii_digit())
}
