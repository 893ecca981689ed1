//! Trading-day calendar used to compute days-to-expiry. A single injectable
//! holiday set rather than a hard-coded exchange calendar, so a second
//! exchange is a second `TradingCalendar` value, not a code change.

use std::collections::HashSet;

use chrono::{Datelike, NaiveDate, Utc, Weekday};

#[derive(Debug, Clone, Default)]
pub struct TradingCalendar {
    holidays: HashSet<NaiveDate>,
}

impl TradingCalendar {
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// Trading days from today (inclusive of today) through `expiry`,
    /// excluding weekends and holidays. Mirrors the distilled core's
    /// one-day-per-loop-iteration counter, starting at 1 for "expires today".
    pub fn days_to_expiry(&self, expiry: Option<NaiveDate>) -> i64 {
        let Some(expiry) = expiry else {
            return 0;
        };
        let mut current = Utc::now().date_naive();
        if current >= expiry {
            return if current == expiry { 1 } else { 0 };
        }

        let mut days: i64 = 1;
        while current < expiry {
            current = current.succ_opt().expect("date overflow");
            if !self.is_trading_day(current) {
                continue;
            }
            days += 1;
        }
        days
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn past_expiry_is_zero_unless_today() {
        let calendar = TradingCalendar::default();
        let yesterday = Utc::now().date_naive() - Duration::days(1);
        assert_eq!(calendar.days_to_expiry(Some(yesterday)), 0);
    }

    #[test]
    fn none_expiry_is_zero() {
        let calendar = TradingCalendar::default();
        assert_eq!(calendar.days_to_expiry(None), 0);
    }

    #[test]
    fn holiday_and_weekend_are_not_trading_days() {
        let saturday = NaiveDate::from_ymd_opt(2024, 1, 6).unwrap();
        let monday = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();
        assert_eq!(saturday.weekday(), Weekday::Sat);

        let calendar = TradingCalendar::new([monday]);
        assert!(!calendar.is_trading_day(saturday));
        assert!(!calendar.is_trading_day(monday));
        assert!(calendar.is_trading_day(tuesday));
    }
}
