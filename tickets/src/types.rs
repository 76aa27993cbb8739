//! Domain types for UMA ticket sales.
//!
//! Identifiers, the Event/Ticket/Payment/Invoice records and their status
//! enums, and buyer wallet credentials.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an event
    EventId
);
uuid_id!(
    /// Unique identifier for a ticket
    TicketId
);
uuid_id!(
    /// Unique identifier for a payment
    PaymentId
);
uuid_id!(
    /// Unique identifier for a buyer
    UserId
);

// ============================================================================
// Money
// ============================================================================

/// An amount in satoshis, the smallest unit tickets are priced in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sats(u64);

impl Sats {
    /// Zero satoshis
    pub const ZERO: Self = Self(0);

    /// Wrap a satoshi amount
    #[must_use]
    pub const fn new(sats: u64) -> Self {
        Self(sats)
    }

    /// Satoshi value
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Value in millisatoshis, the unit LNURL and UMA amounts travel in
    #[must_use]
    pub const fn millisats(self) -> u64 {
        self.0.saturating_mul(1000)
    }

    /// Convert an exact millisatoshi amount; `None` when it has a sub-sat remainder
    #[must_use]
    pub const fn from_millisats(msats: u64) -> Option<Self> {
        if msats % 1000 == 0 {
            Some(Self(msats / 1000))
        } else {
            None
        }
    }

    /// Whether this is a zero amount
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Sats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sats", self.0)
    }
}

// ============================================================================
// Statuses
// ============================================================================

/// Error returned when a status string from storage is not recognised
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status: {0}")]
pub struct UnknownStatus(pub String);

/// Payment status of a ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Awaiting settlement
    Pending,
    /// Settled
    Paid,
    /// Payment request could not be delivered
    Failed,
    /// Invoice expired before settlement
    Expired,
    /// Free event, no payment involved
    Free,
}

impl TicketStatus {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Free => "free",
        }
    }

    /// Whether a ticket in this status occupies a capacity slot
    #[must_use]
    pub const fn holds_capacity(self) -> bool {
        matches!(self, Self::Pending | Self::Paid | Self::Free)
    }
}

impl From<PaymentStatus> for TicketStatus {
    fn from(status: PaymentStatus) -> Self {
        match status {
            PaymentStatus::Pending => Self::Pending,
            PaymentStatus::Paid => Self::Paid,
            PaymentStatus::Failed => Self::Failed,
            PaymentStatus::Expired => Self::Expired,
        }
    }
}

impl FromStr for TicketStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            "free" => Ok(Self::Free),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a payment record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Invoice issued, awaiting settlement
    Pending,
    /// Settlement reconciled
    Paid,
    /// Push to the buyer's provider failed
    Failed,
    /// Invoice expired
    Expired,
}

impl PaymentStatus {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    /// Whether an admin may re-issue the payment
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Failed | Self::Expired)
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Records
// ============================================================================

/// An event tickets are sold for
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event ID
    pub id: EventId,
    /// Title
    pub title: String,
    /// Start of the event
    pub starts_at: DateTime<Utc>,
    /// End of the event
    pub ends_at: DateTime<Utc>,
    /// Maximum number of tickets
    pub capacity: u32,
    /// Price per ticket; zero means free
    pub price: Sats,
    /// Whether tickets are on sale
    pub active: bool,
}

impl Event {
    /// Whether the event is free
    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.price.is_zero()
    }
}

/// Human-presentable ticket code, e.g. `TKT-7QX4M2PA`
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketCode(String);

impl TicketCode {
    const ALPHABET: &'static [u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

    /// Generate a random code. Uniqueness is enforced by storage.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..8)
            .map(|_| char::from(Self::ALPHABET[rng.gen_range(0..Self::ALPHABET.len())]))
            .collect();
        Self(format!("TKT-{suffix}"))
    }

    /// Wrap a stored code
    #[must_use]
    pub const fn from_string(code: String) -> Self {
        Self(code)
    }

    /// Code as text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A ticket held by a buyer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket ID
    pub id: TicketId,
    /// Event the ticket admits to
    pub event_id: EventId,
    /// Buyer
    pub user_id: UserId,
    /// Unique presentable code
    pub code: TicketCode,
    /// Payment status
    pub status: TicketStatus,
    /// Processor invoice ID, once issued
    pub invoice_id: Option<String>,
    /// Buyer's UMA address
    pub buyer_address: Option<String>,
    /// When settlement was reconciled
    pub paid_at: Option<DateTime<Utc>>,
    /// When the ticket was created
    pub created_at: DateTime<Utc>,
}

/// The payment attached to a priced ticket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment ID
    pub id: PaymentId,
    /// Ticket being paid for (one active payment per ticket)
    pub ticket_id: TicketId,
    /// Encoded payment request; the settlement lookup key
    pub invoice: String,
    /// Amount due
    pub amount: Sats,
    /// Status
    pub status: PaymentStatus,
    /// When settlement was reconciled
    pub paid_at: Option<DateTime<Utc>>,
    /// Counterparty URL to notify after settlement, learned from its pull request
    pub counterparty_callback: Option<String>,
    /// When the payment was created
    pub created_at: DateTime<Utc>,
}

/// An invoice issued by the Lightning processor for exactly one ticket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// Processor-side invoice ID
    pub id: String,
    /// Ticket this invoice is scoped to
    pub ticket_id: TicketId,
    /// Payment hash
    pub payment_hash: String,
    /// Encoded payment request (bolt11)
    pub encoded: String,
    /// Amount
    pub amount: Sats,
    /// When the invoice stops being payable
    pub expires_at: DateTime<Utc>,
    /// Receiving address the invoice was issued under
    pub issuing_address: String,
    /// Free-text description embedded in the invoice
    pub description: String,
}

impl Invoice {
    /// Whether the invoice can no longer be paid
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Stored wallet connection letting the backend pay on a buyer's behalf
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletCredential {
    /// Buyer
    pub user_id: UserId,
    /// Opaque wallet-connect URI
    pub connection_uri: String,
    /// Optional expiry
    pub expires_at: Option<DateTime<Utc>>,
    /// Last upsert
    pub updated_at: DateTime<Utc>,
}

impl WalletCredential {
    /// Whether the credential may be used at `now`
    #[must_use]
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.connection_uri.is_empty() && self.expires_at.is_none_or(|expires| expires > now)
    }
}

impl fmt::Debug for WalletCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletCredential")
            .field("user_id", &self.user_id)
            .field("connection_uri", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}
