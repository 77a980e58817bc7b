use std::fmt::{Display, Formatter};

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use time::Date;
use ulid::Ulid;

mod dates;
mod reminders;
mod summary;
mod values;

pub use dates::{
    classify_year, format_canonical_date, normalize, parse_canonical_date, DateValue, YearEra,
    GREGORIAN_YEAR_THRESHOLD,
};
pub use reminders::{plan_reminders, Reminder, ReminderLead};
pub use summary::{summarize, LedgerSummary};
pub use values::{AmountValue, KindValue};

/// Width of generated check numbers.
pub const CHECK_NUMBER_DIGITS: usize = 6;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum LedgerError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("check not found: {0}")]
    NotFound(String),
}

/// Record identifier. Older builds wrote millisecond timestamps, sometimes as
/// JSON numbers; those are read as their decimal text.
#[derive(Debug, Clone, Serialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct CheckId(pub String);

impl<'de> Deserialize<'de> for CheckId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        values::scalar_text(deserializer).map(Self)
    }
}

impl CheckId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CheckId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CheckId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum CheckKind {
    /// Issued by the user; counts against the balance.
    Given,
    /// Received by the user; counts toward the balance.
    Taken,
}

impl CheckKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Given => "Given",
            Self::Taken => "Taken",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Given" => Some(Self::Given),
            "Taken" => Some(Self::Taken),
            _ => None,
        }
    }

    #[must_use]
    pub fn signed(self, amount: f64) -> f64 {
        match self {
            Self::Given => -amount,
            Self::Taken => amount,
        }
    }
}

/// One persisted check.
///
/// Dates, type and amount are kept as [`DateValue`], [`KindValue`] and
/// [`AmountValue`] so legacy rows survive a storage round trip untouched.
/// Unknown fields are carried in `extra`. Only the `id` is required.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Check {
    pub id: CheckId,
    #[serde(rename = "type", default)]
    pub kind: KindValue,
    #[serde(default)]
    pub amount: AmountValue,
    #[serde(default)]
    pub due_date: DateValue,
    #[serde(default)]
    pub receive_date: Option<DateValue>,
    #[serde(default, deserialize_with = "values::optional_scalar_text")]
    pub counterparty: String,
    #[serde(default, deserialize_with = "values::optional_scalar_text")]
    pub bank: String,
    #[serde(default, deserialize_with = "values::optional_scalar_text")]
    pub check_number: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Check {
    #[must_use]
    pub fn due_on(&self) -> Option<Date> {
        self.due_date.to_date()
    }

    #[must_use]
    pub fn received_on(&self) -> Option<Date> {
        self.receive_date.as_ref().and_then(DateValue::to_date)
    }

    /// Copy of this record with both dates passed through [`normalize`].
    /// A blank receive date becomes `None`.
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self {
            due_date: normalize(&self.due_date),
            receive_date: self
                .receive_date
                .as_ref()
                .filter(|value| !value.is_blank())
                .map(normalize),
            ..self.clone()
        }
    }

    /// Validate field-level invariants of one record.
    ///
    /// # Errors
    /// Returns [`LedgerError::Validation`] when the type, amount, dates, or
    /// required text fields are invalid.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.id.as_str().trim().is_empty() {
            return Err(LedgerError::Validation("id MUST be provided".to_string()));
        }

        if self.kind.known().is_none() {
            return Err(LedgerError::Validation(format!(
                "type MUST be Given or Taken, got {}",
                self.kind
            )));
        }

        match self.amount {
            AmountValue::Number(amount) if amount.is_finite() && amount > 0.0 => {}
            _ => {
                return Err(LedgerError::Validation(
                    "amount MUST be a number greater than zero".to_string(),
                ))
            }
        }

        let Some(due) = self.due_on() else {
            return Err(LedgerError::Validation(format!(
                "dueDate MUST be a valid YYYY-MM-DD date, got {}",
                self.due_date
            )));
        };

        if let Some(receive_date) = self.receive_date.as_ref().filter(|value| !value.is_blank()) {
            let Some(received) = receive_date.to_date() else {
                return Err(LedgerError::Validation(format!(
                    "receiveDate MUST be a valid YYYY-MM-DD date, got {receive_date}"
                )));
            };
            if received > due {
                return Err(LedgerError::Validation(
                    "receiveDate MUST NOT be later than dueDate".to_string(),
                ));
            }
        }

        for (name, value) in [
            ("counterparty", &self.counterparty),
            ("bank", &self.bank),
            ("checkNumber", &self.check_number),
        ] {
            if value.trim().is_empty() {
                return Err(LedgerError::Validation(format!("{name} MUST be non-empty")));
            }
        }

        Ok(())
    }
}

/// User input for a new check; the id is assigned on insertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckDraft {
    #[serde(rename = "type")]
    pub kind: CheckKind,
    pub amount: f64,
    pub due_date: DateValue,
    #[serde(default)]
    pub receive_date: Option<DateValue>,
    pub counterparty: String,
    pub bank: String,
    pub check_number: String,
}

impl CheckDraft {
    #[must_use]
    pub fn into_check(self, id: CheckId) -> Check {
        Check {
            id,
            kind: self.kind.into(),
            amount: self.amount.into(),
            due_date: self.due_date,
            receive_date: self.receive_date.filter(|value| !value.is_blank()),
            counterparty: self.counterparty,
            bank: self.bank,
            check_number: self.check_number,
            extra: Map::new(),
        }
    }
}

/// Records decoded from a stored JSON array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedChecks {
    pub checks: Vec<Check>,
    /// Elements that are not records at all: not an object, or no usable `id`.
    pub skipped: usize,
}

/// Decode a JSON array of records one element at a time, so one unreadable
/// element does not discard the rest.
///
/// # Errors
/// Returns an error when `raw` is not a JSON array.
pub fn decode_checks(raw: &str) -> Result<DecodedChecks, serde_json::Error> {
    let elements: Vec<Value> = serde_json::from_str(raw)?;
    let mut decoded =
        DecodedChecks { checks: Vec::with_capacity(elements.len()), skipped: 0 };
    for element in elements {
        match serde_json::from_value::<Check>(element) {
            Ok(check) => decoded.checks.push(check),
            Err(_) => decoded.skipped += 1,
        }
    }
    Ok(decoded)
}

/// Whether `number` is unused by every record except the one with `exclude_id`.
#[must_use]
pub fn is_check_number_unique(
    number: &str,
    checks: &[Check],
    exclude_id: Option<&CheckId>,
) -> bool {
    !checks
        .iter()
        .any(|check| check.check_number == number && Some(&check.id) != exclude_id)
}

/// Draw random zero-padded check numbers until one is unused.
pub fn generate_unique_check_number<R: Rng + ?Sized>(checks: &[Check], rng: &mut R) -> String {
    loop {
        let number = rng.gen_range(0..1_000_000_u32);
        let candidate = format!("{number:0width$}", width = CHECK_NUMBER_DIGITS);
        if is_check_number_unique(&candidate, checks, None) {
            return candidate;
        }
    }
}

/// Validate one record against its own invariants and the rest of the set.
///
/// # Errors
/// Returns [`LedgerError::Validation`] on field errors or a duplicate check number.
pub fn validate_check(check: &Check, existing: &[Check]) -> Result<(), LedgerError> {
    check.validate()?;
    if !is_check_number_unique(&check.check_number, existing, Some(&check.id)) {
        return Err(LedgerError::Validation(format!(
            "checkNumber {} MUST be unique",
            check.check_number
        )));
    }
    Ok(())
}

/// In-memory record set owned by the application layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckBook {
    checks: Vec<Check>,
}

impl CheckBook {
    #[must_use]
    pub fn new(checks: Vec<Check>) -> Self {
        Self { checks }
    }

    #[must_use]
    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    #[must_use]
    pub fn into_checks(self) -> Vec<Check> {
        self.checks
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &CheckId) -> Option<&Check> {
        self.checks.iter().find(|check| &check.id == id)
    }

    /// Insert a new check under a freshly assigned id.
    ///
    /// # Errors
    /// Returns [`LedgerError::Validation`] when the draft is invalid.
    pub fn add(&mut self, draft: CheckDraft) -> Result<Check, LedgerError> {
        let mut id = CheckId::generate();
        while self.get(&id).is_some() {
            id = CheckId::generate();
        }

        let check = draft.into_check(id);
        validate_check(&check, &self.checks)?;
        self.checks.push(check.clone());
        Ok(check)
    }

    /// Replace the record carrying the same id.
    ///
    /// # Errors
    /// Returns [`LedgerError::NotFound`] for an unknown id, or
    /// [`LedgerError::Validation`] when the replacement is invalid.
    pub fn update(&mut self, check: Check) -> Result<(), LedgerError> {
        let Some(index) = self.checks.iter().position(|existing| existing.id == check.id) else {
            return Err(LedgerError::NotFound(check.id.to_string()));
        };
        validate_check(&check, &self.checks)?;
        if let Some(slot) = self.checks.get_mut(index) {
            *slot = check;
        }
        Ok(())
    }

    /// Delete a record by id and hand it back.
    ///
    /// # Errors
    /// Returns [`LedgerError::NotFound`] for an unknown id.
    pub fn remove(&mut self, id: &CheckId) -> Result<Check, LedgerError> {
        let Some(index) = self.checks.iter().position(|check| &check.id == id) else {
            return Err(LedgerError::NotFound(id.to_string()));
        };
        Ok(self.checks.remove(index))
    }

    pub fn next_check_number<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        generate_unique_check_number(&self.checks, rng)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    use super::*;

    fn draft(check_number: &str) -> CheckDraft {
        CheckDraft {
            kind: CheckKind::Given,
            amount: 100.0,
            due_date: DateValue::from("2025-01-01"),
            receive_date: None,
            counterparty: "A".to_string(),
            bank: "B".to_string(),
            check_number: check_number.to_string(),
        }
    }

    #[test]
    fn wire_shape_round_trips_with_extra_fields() -> anyhow::Result<()> {
        let raw = json!({
            "id": "1",
            "type": "Given",
            "amount": 100,
            "dueDate": "2025-01-01",
            "counterparty": "A",
            "bank": "B",
            "checkNumber": "000001",
            "memo": "rent"
        });

        let check: Check = serde_json::from_value(raw)?;
        assert_eq!(check.id, CheckId::from("1"));
        assert_eq!(check.kind.known(), Some(CheckKind::Given));
        assert_eq!(check.amount.value(), Some(100.0));
        assert_eq!(check.receive_date, None);
        assert_eq!(check.extra.get("memo"), Some(&json!("rent")));

        let encoded = serde_json::to_value(&check)?;
        assert_eq!(encoded.get("receiveDate"), Some(&Value::Null));
        assert_eq!(encoded.get("checkNumber"), Some(&json!("000001")));
        assert_eq!(encoded.get("memo"), Some(&json!("rent")));
        Ok(())
    }

    #[test]
    fn malformed_fields_pass_through_unchanged() -> anyhow::Result<()> {
        let raw = json!({
            "id": 1_700_000_000_000_u64,
            "type": "Cashed",
            "amount": "50",
            "dueDate": 20_250_101,
            "checkNumber": 123_456
        });

        let check: Check = serde_json::from_value(raw)?;
        assert_eq!(check.id, CheckId::from("1700000000000"));
        assert_eq!(check.kind, KindValue::Other(json!("Cashed")));
        assert_eq!(check.amount.value(), Some(50.0));
        assert_eq!(check.due_date, DateValue::Opaque(json!(20_250_101)));
        assert_eq!(check.check_number, "123456");
        assert_eq!(check.counterparty, "");

        let encoded = serde_json::to_value(&check)?;
        assert_eq!(encoded.get("type"), Some(&json!("Cashed")));
        assert_eq!(encoded.get("amount"), Some(&json!("50")));
        assert_eq!(encoded.get("dueDate"), Some(&json!(20_250_101)));
        Ok(())
    }

    #[test]
    fn array_decoding_keeps_every_element_with_an_id() -> anyhow::Result<()> {
        let raw = json!([
            { "id": "1", "type": "Given", "amount": 10, "dueDate": "2025-01-01" },
            { "id": "2", "type": "Taken", "amount": "50", "dueDate": "2025-01-02" },
            { "type": "Given", "amount": 5 },
            "not a record"
        ])
        .to_string();

        let decoded = decode_checks(&raw)?;
        let ids = decoded.checks.iter().map(|check| check.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(decoded.skipped, 2);

        assert!(decode_checks(r#"{"id":"1"}"#).is_err());
        Ok(())
    }

    #[test]
    fn normalized_drops_blank_receive_date_and_unwraps_legacy_dates() -> anyhow::Result<()> {
        let check: Check = serde_json::from_value(json!({
            "id": "7",
            "type": "Taken",
            "amount": 5.5,
            "dueDate": { "value": "2025-10-21T10:07:29.000Z" },
            "receiveDate": "",
            "counterparty": "C",
            "bank": "D",
            "checkNumber": "42"
        }))?;

        let normalized = check.normalized();
        assert_eq!(normalized.due_date, DateValue::from("2025-10-21"));
        assert_eq!(normalized.receive_date, None);
        assert_eq!(normalized.id, check.id);
        Ok(())
    }

    #[test]
    fn validation_rejects_bad_fields() {
        let base = draft("000001").into_check(CheckId::from("1"));
        assert!(base.validate().is_ok());

        let mut zero = base.clone();
        zero.amount = AmountValue::Number(0.0);
        assert!(matches!(zero.validate(), Err(LedgerError::Validation(_))));

        let mut text_amount = base.clone();
        text_amount.amount = AmountValue::Other(json!("50"));
        assert!(text_amount.validate().is_err());

        let mut unknown_kind = base.clone();
        unknown_kind.kind = KindValue::Other(json!("Cashed"));
        assert!(unknown_kind.validate().is_err());

        let mut bad_due = base.clone();
        bad_due.due_date = DateValue::from("2025-13-01");
        assert!(bad_due.validate().is_err());

        let mut late_receive = base.clone();
        late_receive.receive_date = Some(DateValue::from("2025-01-02"));
        assert!(late_receive.validate().is_err());

        let mut same_day = base.clone();
        same_day.receive_date = Some(DateValue::from("2025-01-01"));
        assert!(same_day.validate().is_ok());

        let mut blank_bank = base;
        blank_bank.bank = "  ".to_string();
        assert!(blank_bank.validate().is_err());
    }

    #[test]
    fn check_book_enforces_unique_check_numbers() -> anyhow::Result<()> {
        let mut book = CheckBook::default();
        let first = book.add(draft("000001"))?;
        assert_eq!(book.len(), 1);

        let duplicate = book.add(draft("000001"));
        assert!(matches!(duplicate, Err(LedgerError::Validation(_))));
        assert_eq!(book.len(), 1);

        let mut edited = first.clone();
        edited.amount = AmountValue::Number(250.0);
        book.update(edited)?;
        assert_eq!(book.get(&first.id).and_then(|check| check.amount.value()), Some(250.0));

        let removed = book.remove(&first.id)?;
        assert_eq!(removed.id, first.id);
        assert!(book.is_empty());
        assert!(matches!(book.remove(&first.id), Err(LedgerError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn updating_unknown_id_is_not_found() {
        let mut book = CheckBook::default();
        let stray = draft("9").into_check(CheckId::from("missing"));
        assert_eq!(book.update(stray), Err(LedgerError::NotFound("missing".to_string())));
    }

    #[test]
    fn uniqueness_ignores_the_record_being_edited() {
        let checks = vec![draft("000001").into_check(CheckId::from("1"))];
        assert!(!is_check_number_unique("000001", &checks, None));
        assert!(is_check_number_unique("000001", &checks, Some(&CheckId::from("1"))));
        assert!(is_check_number_unique("000002", &checks, None));
    }

    #[test]
    fn generated_check_numbers_are_six_digits_and_unused() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut book = CheckBook::default();
        for _ in 0..20 {
            let number = book.next_check_number(&mut rng);
            assert_eq!(number.len(), CHECK_NUMBER_DIGITS);
            assert!(number.bytes().all(|byte| byte.is_ascii_digit()));
            assert!(book.add(draft(&number)).is_ok());
        }
        assert_eq!(book.len(), 20);
    }
}
