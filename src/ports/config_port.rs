//! Service settings access port.

use rust_decimal::Decimal;

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_int(&self, section: &str, key: &str, default: i64) -> i64;
    /// `None` when the key is absent, `Some(Err(raw))` when it is not a decimal.
    fn get_decimal(&self, section: &str, key: &str) -> Option<Result<Decimal, String>>;
    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool;
}
