use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of trip states every raw backend value is folded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalStatus {
    Requested,
    Accepted,
    DriverArrived,
    Started,
    Completed,
    PassengerCancelled,
    DriverCancelled,
    /// Cancelled without a known cancelling party.
    Cancelled,
    Unknown,
}

impl CanonicalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Accepted => "accepted",
            Self::DriverArrived => "driver_arrived",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::PassengerCancelled => "passenger_cancelled",
            Self::DriverCancelled => "driver_cancelled",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    /// True for every cancelled variant, attributed or not.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::PassengerCancelled | Self::DriverCancelled | Self::Cancelled
        )
    }

    /// True once the trip can no longer change on its own.
    pub fn is_terminal(&self) -> bool {
        self.is_cancelled() || *self == Self::Completed
    }
}

impl fmt::Display for CanonicalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alias entry resolved before cancelling-party disambiguation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Alias {
    Status(CanonicalStatus),
    GenericCancel,
}

const ALIASES: &[(&str, Alias)] = &[
    ("requested", Alias::Status(CanonicalStatus::Requested)),
    ("pending", Alias::Status(CanonicalStatus::Requested)),
    ("searching", Alias::Status(CanonicalStatus::Requested)),
    ("searchingdriver", Alias::Status(CanonicalStatus::Requested)),
    ("scheduled", Alias::Status(CanonicalStatus::Requested)),
    ("prebooked", Alias::Status(CanonicalStatus::Requested)),
    ("booked", Alias::Status(CanonicalStatus::Requested)),
    ("accepted", Alias::Status(CanonicalStatus::Accepted)),
    ("driveraccepted", Alias::Status(CanonicalStatus::Accepted)),
    ("assigned", Alias::Status(CanonicalStatus::Accepted)),
    ("driverassigned", Alias::Status(CanonicalStatus::Accepted)),
    ("ontheway", Alias::Status(CanonicalStatus::Accepted)),
    ("driverontheway", Alias::Status(CanonicalStatus::Accepted)),
    ("enroute", Alias::Status(CanonicalStatus::Accepted)),
    ("driverarrived", Alias::Status(CanonicalStatus::DriverArrived)),
    ("hasdriverarrived", Alias::Status(CanonicalStatus::DriverArrived)),
    ("arrived", Alias::Status(CanonicalStatus::DriverArrived)),
    ("started", Alias::Status(CanonicalStatus::Started)),
    ("inprogress", Alias::Status(CanonicalStatus::Started)),
    ("tripinprogress", Alias::Status(CanonicalStatus::Started)),
    ("tripstarted", Alias::Status(CanonicalStatus::Started)),
    ("ongoing", Alias::Status(CanonicalStatus::Started)),
    ("completed", Alias::Status(CanonicalStatus::Completed)),
    ("tripcompleted", Alias::Status(CanonicalStatus::Completed)),
    ("finished", Alias::Status(CanonicalStatus::Completed)),
    ("passengercancelled", Alias::Status(CanonicalStatus::PassengerCancelled)),
    ("passengercanceled", Alias::Status(CanonicalStatus::PassengerCancelled)),
    ("ridercancelled", Alias::Status(CanonicalStatus::PassengerCancelled)),
    ("drivercancelled", Alias::Status(CanonicalStatus::DriverCancelled)),
    ("drivercanceled", Alias::Status(CanonicalStatus::DriverCancelled)),
    ("cancelled", Alias::GenericCancel),
    ("canceled", Alias::GenericCancel),
    ("tripcancelled", Alias::GenericCancel),
    ("tripcanceled", Alias::GenericCancel),
];

/// Lower-case `raw` and drop everything that is not an ASCII letter.
fn fold(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Map a raw status/state string to its canonical value.
///
/// Case, whitespace and punctuation are ignored (`"Driver-Arrived"`,
/// `"driver_arrived"` and `"HASDRIVERARRIVED"` are the same value). A
/// generic cancellation is attributed through `cancelled_by`; anything not
/// in the alias table is [`CanonicalStatus::Unknown`].
pub fn normalize(raw: &str, cancelled_by: Option<&str>) -> CanonicalStatus {
    let folded = fold(raw);
    let alias = ALIASES
        .iter()
        .find(|(name, _)| *name == folded)
        .map(|(_, alias)| *alias);

    match alias {
        Some(Alias::Status(status)) => status,
        Some(Alias::GenericCancel) => match cancelled_by.map(fold).as_deref() {
            Some("driver") => CanonicalStatus::DriverCancelled,
            Some("passenger") => CanonicalStatus::PassengerCancelled,
            _ => CanonicalStatus::Cancelled,
        },
        None => CanonicalStatus::Unknown,
    }
}
