//! Core value types for the credit ledger.
//!
//! Identifiers and amounts are validated at construction so that engine and
//! store code never sees an empty id, a non-positive operation amount, or a
//! zero entry delta.

use std::fmt;

use uuid::Uuid;

use crate::error::LedgerError;

/// Top-level multi-tenancy boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantId(String);

/// Account owner within a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

/// Named balance namespace within a (tenant, user) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerId(String);

/// Client-supplied reservation identifier, unique within an account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReservationId(String);

/// Client-supplied token scoping duplicate detection within an account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

fn normalized_identifier(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

impl TenantId {
    /// Validates and normalizes a tenant id.
    pub fn new(raw: &str) -> Result<Self, LedgerError> {
        normalized_identifier(raw)
            .map(Self)
            .ok_or_else(|| LedgerError::InvalidTenantId("empty value".to_owned()))
    }

    /// Returns the normalized identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl UserId {
    /// Validates and normalizes a user id.
    pub fn new(raw: &str) -> Result<Self, LedgerError> {
        normalized_identifier(raw)
            .map(Self)
            .ok_or_else(|| LedgerError::InvalidUserId("empty value".to_owned()))
    }

    /// Returns the normalized identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl LedgerId {
    /// Validates and normalizes a ledger id.
    pub fn new(raw: &str) -> Result<Self, LedgerError> {
        normalized_identifier(raw)
            .map(Self)
            .ok_or_else(|| LedgerError::InvalidLedgerId("empty value".to_owned()))
    }

    /// Returns the normalized identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ReservationId {
    /// Validates and normalizes a reservation id.
    pub fn new(raw: &str) -> Result<Self, LedgerError> {
        normalized_identifier(raw)
            .map(Self)
            .ok_or_else(|| LedgerError::InvalidReservationId("empty value".to_owned()))
    }

    /// Returns the normalized identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl IdempotencyKey {
    /// Validates and normalizes an idempotency key.
    pub fn new(raw: &str) -> Result<Self, LedgerError> {
        normalized_identifier(raw)
            .map(Self)
            .ok_or_else(|| LedgerError::InvalidIdempotencyKey("empty value".to_owned()))
    }

    /// Derives a suffixed key (`base:suffix`).
    ///
    /// Capture uses derived keys so each physical write has its own
    /// uniqueness scope while the client-supplied key keeps the whole
    /// operation retry-safe.
    pub fn derive(&self, suffix: &str) -> Self {
        Self(format!("{}:{}", self.0, suffix))
    }

    /// Returns the normalized key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! display_as_str {
    ($($name:ty),*) => {
        $(impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        })*
    };
}

display_as_str!(TenantId, UserId, LedgerId, ReservationId, IdempotencyKey);

/// The addressing triple that owns a balance.
///
/// Accounts are created lazily on first reference and never destroyed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountRef {
    /// Tenant boundary.
    pub tenant: TenantId,
    /// Account owner.
    pub user: UserId,
    /// Balance namespace.
    pub ledger: LedgerId,
}

impl AccountRef {
    /// Builds the triple from raw request fields, validating each part.
    pub fn new(tenant: &str, user: &str, ledger: &str) -> Result<Self, LedgerError> {
        Ok(Self {
            tenant: TenantId::new(tenant)?,
            user: UserId::new(user)?,
            ledger: LedgerId::new(ledger)?,
        })
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tenant, self.user, self.ledger)
    }
}

/// Opaque generated account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountId(Uuid);

impl AccountId {
    /// Wraps a store-generated id.
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Strictly positive amount in cents, as supplied by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PositiveAmountCents(i64);

impl PositiveAmountCents {
    /// Rejects zero and negative amounts.
    pub fn new(raw: i64) -> Result<Self, LedgerError> {
        if raw <= 0 {
            return Err(LedgerError::InvalidAmountCents(
                "must be greater than zero".to_owned(),
            ));
        }
        Ok(Self(raw))
    }

    /// Returns the amount in cents.
    pub fn get(&self) -> i64 {
        self.0
    }

    /// The stored delta for a credit entry (grant, reverse hold).
    pub fn credit(&self) -> EntryAmountCents {
        EntryAmountCents(self.0)
    }

    /// The stored delta for a debit entry (hold, spend).
    pub fn debit(&self) -> EntryAmountCents {
        EntryAmountCents(-self.0)
    }
}

impl fmt::Display for PositiveAmountCents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Non-zero signed delta stored on a ledger entry.
///
/// The sign is fixed per entry type: grants and reverse holds are positive,
/// holds and spends are negative. Conversions from [`PositiveAmountCents`]
/// are explicit; there is no arithmetic on this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryAmountCents(i64);

impl EntryAmountCents {
    /// Rejects a zero delta.
    pub fn new(raw: i64) -> Result<Self, LedgerError> {
        if raw == 0 {
            return Err(LedgerError::InvalidAmountCents(
                "entry delta must be non-zero".to_owned(),
            ));
        }
        Ok(Self(raw))
    }

    /// Returns the signed delta in cents.
    pub fn get(&self) -> i64 {
        self.0
    }

    /// Flips the sign of the delta.
    pub fn negated(&self) -> Self {
        Self(-self.0)
    }
}

/// Validated JSON metadata document.
///
/// Empty or whitespace-only input normalizes to `{}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataJson(String);

impl MetadataJson {
    /// Validates that the input is syntactically valid JSON.
    pub fn new(raw: &str) -> Result<Self, LedgerError> {
        let normalized = raw.trim();
        if normalized.is_empty() {
            return Ok(Self("{}".to_owned()));
        }
        if serde_json::from_str::<serde_json::Value>(normalized).is_err() {
            return Err(LedgerError::InvalidMetadataJson(
                "must be valid json".to_owned(),
            ));
        }
        Ok(Self(normalized.to_owned()))
    }

    /// An empty (`{}`) document.
    pub fn empty() -> Self {
        Self("{}".to_owned())
    }

    /// Returns the normalized JSON text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MetadataJson {
    fn default() -> Self {
        Self::empty()
    }
}

/// Ledger entry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// Positive credit, possibly expiring.
    Grant,
    /// Marker written when a reservation is created; excluded from totals.
    Hold,
    /// Releases the available-balance impact of a prior hold.
    ReverseHold,
    /// Debit, immediate or produced by a capture.
    Spend,
}

impl EntryType {
    /// Stable string form persisted by store adapters.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Grant => "grant",
            EntryType::Hold => "hold",
            EntryType::ReverseHold => "reverse_hold",
            EntryType::Spend => "spend",
        }
    }

    /// Parses the stable string form.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "grant" => Some(EntryType::Grant),
            "hold" => Some(EntryType::Hold),
            "reverse_hold" => Some(EntryType::ReverseHold),
            "spend" => Some(EntryType::Spend),
            _ => None,
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reservation lifecycle states.
///
/// A reservation is created `Active` and moves exactly once to `Captured`
/// or `Released`; both are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationStatus {
    /// Holding funds; counted against the available balance.
    Active,
    /// Finalized into a spend.
    Captured,
    /// Cancelled without spending.
    Released,
}

impl ReservationStatus {
    /// Stable string form persisted by store adapters.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Captured => "captured",
            ReservationStatus::Released => "released",
        }
    }

    /// Parses the stable string form.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(ReservationStatus::Active),
            "captured" => Some(ReservationStatus::Captured),
            "released" => Some(ReservationStatus::Released),
            _ => None,
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single immutable line in the append-only ledger log (read model).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Generated entry id.
    pub entry_id: Uuid,
    /// Owning account.
    pub account_id: AccountId,
    /// Entry kind.
    pub entry_type: EntryType,
    /// Signed delta in cents.
    pub amount_cents: i64,
    /// Reservation this entry belongs to, if any.
    pub reservation_id: Option<String>,
    /// Duplicate-detection key, unique within the account.
    pub idempotency_key: String,
    /// Unix-seconds expiry; `None` means never expires (grants only).
    pub expires_at_unix: Option<i64>,
    /// Metadata JSON document.
    pub metadata_json: String,
    /// Unix-seconds creation time.
    pub created_at_unix: i64,
}

/// A ledger entry to be appended (write model).
#[derive(Debug, Clone)]
pub struct NewEntry {
    /// Owning account.
    pub account_id: AccountId,
    /// Entry kind.
    pub entry_type: EntryType,
    /// Signed, non-zero delta.
    pub amount: EntryAmountCents,
    /// Reservation this entry belongs to, if any.
    pub reservation_id: Option<ReservationId>,
    /// Duplicate-detection key.
    pub idempotency_key: IdempotencyKey,
    /// Unix-seconds expiry; `None` means never expires.
    pub expires_at_unix: Option<i64>,
    /// Metadata document.
    pub metadata: MetadataJson,
    /// Unix-seconds creation time.
    pub created_at_unix: i64,
}

/// A stored reservation record (read model).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// Owning account.
    pub account_id: AccountId,
    /// Client-supplied reservation id.
    pub reservation_id: String,
    /// Reserved amount in cents (strictly positive).
    pub amount_cents: i64,
    /// Current lifecycle state.
    pub status: ReservationStatus,
}

/// A reservation to be created (write model).
#[derive(Debug, Clone)]
pub struct NewReservation {
    /// Owning account.
    pub account_id: AccountId,
    /// Client-supplied reservation id.
    pub reservation_id: ReservationId,
    /// Reserved amount.
    pub amount: PositiveAmountCents,
    /// Initial lifecycle state.
    pub status: ReservationStatus,
}

/// Derived balance view for an account.
///
/// `total` nets all non-expired grant and spend deltas; `available`
/// subtracts the amounts of active reservations. Neither is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Balance {
    /// Net of non-hold, non-expired entries.
    pub total_cents: i64,
    /// `total_cents` minus active reservation amounts.
    pub available_cents: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_trim_surrounding_whitespace() {
        let user = UserId::new("  user-1\t").unwrap();
        assert_eq!(user.as_str(), "user-1");
        let tenant = TenantId::new(" acme ").unwrap();
        assert_eq!(tenant.as_str(), "acme");
    }

    #[test]
    fn empty_identifiers_are_rejected() {
        assert!(matches!(
            UserId::new("   "),
            Err(LedgerError::InvalidUserId(_))
        ));
        assert!(matches!(TenantId::new(""), Err(LedgerError::InvalidTenantId(_))));
        assert!(matches!(
            LedgerId::new("\n"),
            Err(LedgerError::InvalidLedgerId(_))
        ));
        assert!(matches!(
            ReservationId::new(""),
            Err(LedgerError::InvalidReservationId(_))
        ));
        assert!(matches!(
            IdempotencyKey::new(" "),
            Err(LedgerError::InvalidIdempotencyKey(_))
        ));
    }

    #[test]
    fn positive_amount_rejects_zero_and_negative() {
        assert!(PositiveAmountCents::new(1).is_ok());
        assert!(matches!(
            PositiveAmountCents::new(0),
            Err(LedgerError::InvalidAmountCents(_))
        ));
        assert!(matches!(
            PositiveAmountCents::new(-5),
            Err(LedgerError::InvalidAmountCents(_))
        ));
    }

    #[test]
    fn entry_amount_sign_conversions_are_explicit() {
        let amount = PositiveAmountCents::new(250).unwrap();
        assert_eq!(amount.credit().get(), 250);
        assert_eq!(amount.debit().get(), -250);
        assert_eq!(amount.debit().negated().get(), 250);
        assert!(EntryAmountCents::new(0).is_err());
    }

    #[test]
    fn metadata_defaults_to_empty_object() {
        assert_eq!(MetadataJson::new("").unwrap().as_str(), "{}");
        assert_eq!(MetadataJson::new("  \t").unwrap().as_str(), "{}");
    }

    #[test]
    fn metadata_requires_valid_json() {
        assert_eq!(
            MetadataJson::new(r#"{"k":"v"}"#).unwrap().as_str(),
            r#"{"k":"v"}"#
        );
        assert!(matches!(
            MetadataJson::new("{not json"),
            Err(LedgerError::InvalidMetadataJson(_))
        ));
    }

    #[test]
    fn idempotency_key_derivation_appends_suffix() {
        let key = IdempotencyKey::new("c1").unwrap();
        assert_eq!(key.derive("reverse").as_str(), "c1:reverse");
        assert_eq!(key.derive("spend").as_str(), "c1:spend");
    }

    #[test]
    fn entry_type_round_trips_through_stable_strings() {
        for entry_type in [
            EntryType::Grant,
            EntryType::Hold,
            EntryType::ReverseHold,
            EntryType::Spend,
        ] {
            assert_eq!(EntryType::parse(entry_type.as_str()), Some(entry_type));
        }
        assert_eq!(EntryType::parse("refund"), None);
    }

    #[test]
    fn reservation_status_round_trips_through_stable_strings() {
        for status in [
            ReservationStatus::Active,
            ReservationStatus::Captured,
            ReservationStatus::Released,
        ] {
            assert_eq!(ReservationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ReservationStatus::parse("expired"), None);
    }
}
