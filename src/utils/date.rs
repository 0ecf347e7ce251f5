use chrono::{Local, NaiveDate, Utc};
use chrono_tz::Tz;

/// Today's calendar date, in `timezone` when given and in host local time otherwise.
pub fn today_in(timezone: Option<Tz>) -> NaiveDate {
    match timezone {
        Some(tz) => Utc::now().with_timezone(&tz).date_naive(),
        None => Local::now().date_naive(),
    }
}

/// Format an as-of date the way engines expect it (YYYY-MM-DD)
pub fn format_as_of(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parse an IANA timezone name such as `America/New_York`
pub fn parse_timezone(name: &str) -> Option<Tz> {
    name.trim().parse::<Tz>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_as_of() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(format_as_of(date), "2024-03-07");
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone("America/New_York"), Some(chrono_tz::America::New_York));
        assert_eq!(parse_timezone(" Asia/Ho_Chi_Minh "), Some(chrono_tz::Asia::Ho_Chi_Minh));
        assert!(parse_timezone("Mars/Olympus_Mons").is_none());
    }

    #[test]
    fn test_today_in_timezone_is_within_a_day_of_utc() {
        let utc_today = Utc::now().date_naive();
        for tz in [chrono_tz::Pacific::Kiritimati, chrono_tz::Pacific::Pago_Pago] {
            let local = today_in(Some(tz));
            assert!((local - utc_today).num_days().abs() <= 1);
        }
    }
}
