//! Turning raw evaluation results into stored string values.

use crate::evaluator::Value;
use crate::metadata::DataElement;
use chrono::NaiveDate;

/// Formats a raw result for the output element's declared value type.
///
/// Returns `None` when no prediction should be stored: non-finite numbers,
/// zeros that are insignificant for the element, malformed dates, and values
/// of the wrong shape for the type.
pub fn format_prediction(value: Option<&Value>, element: &DataElement) -> Option<String> {
    let value_type = element.value_type;

    if value_type.is_numeric() {
        let number = match value {
            None => 0.0,
            Some(Value::Number(n)) => *n,
            Some(_) => return None,
        };
        return format_number(number, element);
    }

    if value_type.is_text() {
        return Some(match value {
            None => String::new(),
            Some(Value::Number(n)) => format_number(*n, element)?,
            Some(Value::Text(s)) => s.clone(),
            Some(Value::Bool(b)) => b.to_string(),
        });
    }

    if value_type.is_date() {
        return match value {
            Some(Value::Text(s)) if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() => {
                Some(s.clone())
            }
            _ => None,
        };
    }

    if value_type.is_boolean() {
        return match value {
            None => Some("false".to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            Some(_) => None,
        };
    }

    None
}

/// Integer-typed outputs round to the nearest whole number, every other
/// numeric output to four decimal digits. Rounded zeros that are
/// insignificant for the element are suppressed.
fn format_number(number: f64, element: &DataElement) -> Option<String> {
    if number.is_nan() || number.is_infinite() {
        return None;
    }

    if element.value_type.is_integer() {
        let rounded = number.round();
        if element.zero_is_insignificant(rounded) {
            return None;
        }
        return Some(format!("{}", rounded as i64));
    }

    let rounded = (number * 10_000.0).round() / 10_000.0;
    if element.zero_is_insignificant(rounded) {
        return None;
    }
    Some(format!("{}", rounded))
}
