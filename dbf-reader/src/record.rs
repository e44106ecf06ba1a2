use chrono::NaiveDate;
use rust_decimal::Decimal;

/// A single scalar field value decoded from a table file.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Date(NaiveDate),
    Logical(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Text content for `Text` values, `None` otherwise.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// One row of a table file: an ordered field name / value sequence.
///
/// Field order follows the source file; lookups never depend on it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.fields.push((name.into(), value));
    }

    /// Case-insensitive field lookup; the first match wins.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_is_case_insensitive() {
        let mut record = Record::new();
        record.push("Part_No", Value::Text("A-1".into()));
        assert_eq!(record.get("PART_NO"), Some(&Value::Text("A-1".into())));
        assert_eq!(record.get("part_no"), Some(&Value::Text("A-1".into())));
        assert!(record.get("PRICE").is_none());
    }

    #[test]
    fn fields_preserve_source_order() {
        let record: Record = vec![
            ("B".to_string(), Value::Integer(2)),
            ("A".to_string(), Value::Integer(1)),
        ]
        .into_iter()
        .collect();
        let names: Vec<&str> = record.field_names().collect();
        assert_eq!(names, vec!["B", "A"]);
    }
}
