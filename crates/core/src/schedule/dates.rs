//! Heuristic parsing of Brazilian Portuguese date phrases as customers
//! type them: "amanhã", "sexta", "15/02", "dia 20". Anything unrecognized
//! returns `None` and the caller asks the customer to restate the date.

use chrono::{Datelike, Days, NaiveDate};

const WEEKDAY_NAMES: &[(&str, u8)] = &[
    ("domingo", 0),
    ("segunda", 1),
    ("terca", 2),
    ("terça", 2),
    ("quarta", 3),
    ("quinta", 4),
    ("sexta", 5),
    ("sabado", 6),
    ("sábado", 6),
    ("dom", 0),
    ("seg", 1),
    ("ter", 2),
    ("qua", 3),
    ("qui", 4),
    ("sex", 5),
    ("sab", 6),
];

const WEEKDAY_PT: &[&str] =
    &["Domingo", "Segunda", "Terça", "Quarta", "Quinta", "Sexta", "Sábado"];

/// Day-of-week name in Portuguese, used in confirmation messages.
pub fn weekday_name(date: NaiveDate) -> &'static str {
    WEEKDAY_PT[date.weekday().num_days_from_sunday() as usize]
}

/// Parse a customer-supplied date phrase relative to `today`.
///
/// Recognized forms, tried in order: relative terms (hoje, amanhã, depois
/// de amanhã), weekday names and their three-letter abbreviations (resolved
/// to the next occurrence, rolling a full week when the named day is today
/// or already past), `dd/mm` and `dd/mm/yyyy`, and a bare day number
/// ("dia 15" or "15") assumed to be this month, or next month when that day
/// has already passed.
pub fn parse_date(phrase: &str, today: NaiveDate) -> Option<NaiveDate> {
    let lower = phrase.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }

    // "depois de amanhã" must win over the plain "amanhã" substring check.
    if lower.contains("depois de amanh") {
        return today.checked_add_days(Days::new(2));
    }
    if lower.contains("amanh") {
        return today.checked_add_days(Days::new(1));
    }
    if lower.contains("hoje") {
        return Some(today);
    }

    for (name, weekday) in WEEKDAY_NAMES {
        if lower.contains(name) {
            let current = today.weekday().num_days_from_sunday() as i64;
            let mut ahead = i64::from(*weekday) - current;
            if ahead <= 0 {
                ahead += 7;
            }
            return today.checked_add_days(Days::new(ahead as u64));
        }
    }

    if let Some(date) = parse_slash_date(&lower, today.year()) {
        return Some(date);
    }

    parse_bare_day(&lower, today)
}

/// `dd/mm` or `dd/mm/yyyy` anywhere in the phrase, tolerating spaces
/// around the slashes. A two-digit year is taken as 20xx.
fn parse_slash_date(lower: &str, default_year: i32) -> Option<NaiveDate> {
    let slash = lower.find('/')?;
    let day = trailing_number(&lower[..slash])?;

    let rest = &lower[slash + 1..];
    let (month, year) = match rest.find('/') {
        Some(next_slash) => {
            let month = leading_number(&rest[..next_slash])?;
            let year = leading_number(&rest[next_slash + 1..]).map(|year| year as i32);
            (month, year)
        }
        None => (leading_number(rest)?, None),
    };

    let year = match year {
        Some(year) if year < 100 => 2000 + year,
        Some(year) => year,
        None => default_year,
    };

    NaiveDate::from_ymd_opt(year, month, day)
}

/// "dia 15" or a lone "15": this month, or next month when the day number
/// is already behind us.
fn parse_bare_day(lower: &str, today: NaiveDate) -> Option<NaiveDate> {
    let digits: String = lower
        .chars()
        .skip_while(|ch| !ch.is_ascii_digit())
        .take_while(|ch| ch.is_ascii_digit())
        .collect();
    let day = digits.parse::<u32>().ok()?;
    if !(1..=31).contains(&day) {
        return None;
    }

    let (mut year, mut month) = (today.year(), today.month());
    if day < today.day() {
        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
    }

    NaiveDate::from_ymd_opt(year, month, day)
}

fn trailing_number(text: &str) -> Option<u32> {
    let digits: String = text
        .trim_end()
        .chars()
        .rev()
        .take_while(|ch| ch.is_ascii_digit())
        .collect::<String>()
        .chars()
        .rev()
        .collect();
    digits.parse().ok()
}

fn leading_number(text: &str) -> Option<u32> {
    let digits: String =
        text.trim_start().chars().take_while(|ch| ch.is_ascii_digit()).collect();
    digits.parse().ok()
}
