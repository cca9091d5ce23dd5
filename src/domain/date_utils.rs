use chrono::{Datelike, Duration, NaiveDate};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// ISO week key used by weekly reviews.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeekKey {
    pub year: i32,
    pub week_number: u32,
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Monday of the week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// The seven days (Monday to Sunday) of the week containing `date`.
pub fn week_range(date: NaiveDate) -> [NaiveDate; 7] {
    let monday = week_start(date);
    std::array::from_fn(|offset| monday + Duration::days(offset as i64))
}

/// ISO-8601 week of `date`. The year is the ISO week-year, which differs from the
/// calendar year around new year (2024-12-30 belongs to 2025-W01).
pub fn iso_week(date: NaiveDate) -> WeekKey {
    let week = date.iso_week();
    WeekKey {
        year: week.year(),
        week_number: week.week(),
    }
}

/// `HH:MM` as decimal hours (`09:30` is `9.5`). Malformed input yields `None`.
pub fn time_decimal(value: &str) -> Option<f64> {
    let (hour, minute) = value.trim().split_once(':')?;
    let hour = hour.parse::<u32>().ok()?;
    let minute = minute.parse::<u32>().ok()?;
    Some(f64::from(hour) + f64::from(minute) / 60.0)
}

pub fn weekday_label(date: NaiveDate) -> &'static str {
    const LABELS: [&str; 7] = ["월", "화", "수", "목", "금", "토", "일"];
    LABELS[date.weekday().num_days_from_monday() as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(value: &str) -> NaiveDate {
        parse_date(value).expect("valid date")
    }

    #[test]
    fn week_range_starts_on_monday() {
        let days = week_range(date("2024-06-06"));
        assert_eq!(days[0], date("2024-06-03"));
        assert_eq!(days[6], date("2024-06-09"));

        let from_sunday = week_range(date("2024-06-09"));
        assert_eq!(from_sunday[0], date("2024-06-03"));
    }

    #[test]
    fn iso_week_matches_known_weeks() {
        assert_eq!(
            iso_week(date("2024-06-03")),
            WeekKey {
                year: 2024,
                week_number: 23
            }
        );
        assert_eq!(
            iso_week(date("2024-12-30")),
            WeekKey {
                year: 2025,
                week_number: 1
            }
        );
        assert_eq!(
            iso_week(date("2021-01-03")),
            WeekKey {
                year: 2020,
                week_number: 53
            }
        );
    }

    #[test]
    fn time_decimal_converts_minutes_to_fraction() {
        assert_eq!(time_decimal("09:30"), Some(9.5));
        assert_eq!(time_decimal("00:00"), Some(0.0));
        assert_eq!(time_decimal("23:45"), Some(23.75));
        assert_eq!(time_decimal("nine"), None);
        assert_eq!(time_decimal("09"), None);
    }

    #[test]
    fn date_and_weekday_formatting() {
        assert_eq!(format_date(date("2024-06-03")), "2024-06-03");
        assert_eq!(weekday_label(date("2024-06-03")), "월");
        assert_eq!(weekday_label(date("2024-06-09")), "일");
    }
}
