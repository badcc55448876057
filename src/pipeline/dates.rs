//! Free-text date resolution.
//!
//! Sources publish dates in every shape imaginable: `<time datetime>` values,
//! "Sabato 25 Maggio 2024, ore 18:00", "dal 5 al 7 luglio", "15.06.24",
//! "domani sera". `resolve` turns that text into a start/end pair plus a
//! confidence, anchored to the moment the record was collected so the result
//! is deterministic for a given input.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::ops::Range;

use super::normalize::collapse_whitespace;
use crate::domain::DateConfidence;
use crate::types::{DateOrder, Locale};

/// A date without a year is placed in the anchor's year unless that lands it
/// more than this many days before the anchor.
pub const YEAR_ROLLOVER_DAYS: i64 = 60;

const MONTHS: &[(&str, u32)] = &[
    ("gennaio", 1),
    ("febbraio", 2),
    ("marzo", 3),
    ("aprile", 4),
    ("maggio", 5),
    ("giugno", 6),
    ("luglio", 7),
    ("agosto", 8),
    ("settembre", 9),
    ("ottobre", 10),
    ("novembre", 11),
    ("dicembre", 12),
    ("january", 1),
    ("february", 2),
    ("march", 3),
    ("april", 4),
    ("may", 5),
    ("june", 6),
    ("july", 7),
    ("august", 8),
    ("september", 9),
    ("october", 10),
    ("november", 11),
    ("december", 12),
    ("gen", 1),
    ("jan", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("mag", 5),
    ("giu", 6),
    ("jun", 6),
    ("lug", 7),
    ("jul", 7),
    ("ago", 8),
    ("aug", 8),
    ("sett", 9),
    ("set", 9),
    ("sept", 9),
    ("sep", 9),
    ("ott", 10),
    ("oct", 10),
    ("nov", 11),
    ("dic", 12),
    ("dec", 12),
];

const WEEKDAYS: &[(&str, Weekday)] = &[
    ("lunedì", Weekday::Mon),
    ("lunedi", Weekday::Mon),
    ("martedì", Weekday::Tue),
    ("martedi", Weekday::Tue),
    ("mercoledì", Weekday::Wed),
    ("mercoledi", Weekday::Wed),
    ("giovedì", Weekday::Thu),
    ("giovedi", Weekday::Thu),
    ("venerdì", Weekday::Fri),
    ("venerdi", Weekday::Fri),
    ("sabato", Weekday::Sat),
    ("domenica", Weekday::Sun),
    ("monday", Weekday::Mon),
    ("tuesday", Weekday::Tue),
    ("wednesday", Weekday::Wed),
    ("thursday", Weekday::Thu),
    ("friday", Weekday::Fri),
    ("saturday", Weekday::Sat),
    ("sunday", Weekday::Sun),
];

fn alternation<'a>(words: impl Iterator<Item = &'a str>) -> String {
    let mut words: Vec<&str> = words.collect();
    // Longest first so "marzo" wins over "mar".
    words.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    words.dedup();
    words.join("|")
}

static MONTH_ALT: Lazy<String> = Lazy::new(|| alternation(MONTHS.iter().map(|(w, _)| *w)));
static WEEKDAY_ALT: Lazy<String> = Lazy::new(|| alternation(WEEKDAYS.iter().map(|(w, _)| *w)));

fn pattern(template: &str) -> Regex {
    let source = template
        .replace("MONTH", &MONTH_ALT)
        .replace("WEEKDAY", &WEEKDAY_ALT)
        .replace("ORD", r"(?:st|nd|rd|th)?");
    Regex::new(&source).expect("date pattern must compile")
}

static ISO: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(?P<y>\d{4})-(?P<m>\d{2})-(?P<d>\d{2})(?:[t ](?P<hh>\d{2}):(?P<mm>\d{2})(?::\d{2}(?:\.\d+)?)?)?")
});

static DAY_MONTH_RANGE: Lazy<Regex> = Lazy::new(|| {
    pattern(
        r"\b(?:(?:dal(?:l')?|da|from(?:\s+the)?)\s*)?(?P<d1>\d{1,2})ORD\b(?:\s+(?P<m1>MONTH)\b\.?)?(?:\s+(?P<y1>\d{4}))?\s*(?:-|\bal(?:l')?\s*|\ba\s+|\bto(?:\s+the)?\s+|\buntil(?:\s+the)?\s+|\bfino\s+al(?:l')?\s*)\s*(?P<d2>\d{1,2})ORD\b\s+(?P<m2>MONTH)\b\.?(?:\s+(?P<y2>\d{4}))?",
    )
});

static MONTH_DAY_RANGE: Lazy<Regex> = Lazy::new(|| {
    pattern(
        r"\b(?P<m1>MONTH)\b\.?\s+(?P<d1>\d{1,2})ORD\b(?:,?\s+(?P<y1>\d{4}))?\s*(?:-|\bto\s+|\buntil\s+|\bthrough\s+)\s*(?:(?P<m2>MONTH)\b\.?\s+)?(?P<d2>\d{1,2})ORD\b(?:,?\s+(?P<y2>\d{4}))?",
    )
});

static NUMERIC_RANGE: Lazy<Regex> = Lazy::new(|| {
    pattern(
        r"\b(?:(?:dal(?:l')?|da|from)\s*)?(?P<a1>\d{1,2})(?P<s1>[/.-])(?P<b1>\d{1,2})(?:[/.-](?P<y1>\d{2,4}))?\s*(?:-|\bal(?:l')?\s*|\ba\s+|\bto\s+|\buntil\s+)\s*(?P<a2>\d{1,2})(?P<s2>[/.-])(?P<b2>\d{1,2})(?:[/.-](?P<y2>\d{2,4}))?\b",
    )
});

static DAY_MONTH: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(?P<d>\d{1,2})ORD\b\s+(?:di\s+|of\s+)?(?P<m>MONTH)\b\.?(?:,?\s+(?P<y>\d{4}))?")
});

static MONTH_DAY: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(?P<m>MONTH)\b\.?\s+(?P<d>\d{1,2})ORD\b(?:,?\s+(?P<y>\d{4}))?")
});

static NUMERIC: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(?P<a>\d{1,2})(?P<s>[/.-])(?P<b>\d{1,2})(?:[/.-](?P<y>\d{2,4}))?\b")
});

static DAY_ONLY_RANGE: Lazy<Regex> = Lazy::new(|| {
    pattern(
        r"\b(?:dal(?:l')?\s*|da\s+|from\s+(?:the\s+)?)(?P<d1>\d{1,2})ORD\b\s*(?:-|\bal(?:l')?\s*|\ba\s+|\bto\s+(?:the\s+)?|\buntil\s+(?:the\s+)?)\s*(?P<d2>\d{1,2})ORD\b",
    )
});

static NEAR_DAY: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(?P<w>oggi|stasera|stanotte|today|tonight|dopodomani|domani|tomorrow)\b")
});

static WEEKEND: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(?:(?P<next>prossimo|next)\s+)?(?:week-?end|fine\s+settimana)\b")
});

static WEEKDAY_NAME: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(?:(?P<next>prossim[oa]|next)\s+)?(?P<wd>WEEKDAY)\b")
});

static TIME_OF_DAY: Lazy<Regex> = Lazy::new(|| {
    pattern(
        r"(?:(?P<kw>\b(?:ore|alle|dalle|at|from|h))\s*|\b)(?P<h>\d{1,2})(?:[:.](?P<min>\d{2}))?\s*(?P<ap>am|pm)?\b",
    )
});

/// Outcome of date resolution. Times are local wall-clock times of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDate {
    pub start: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
    pub confidence: DateConfidence,
}

impl ResolvedDate {
    /// Placeholder for text nothing could be made of.
    pub fn unresolved(collected_at: DateTime<Utc>) -> Self {
        Self {
            start: collected_at.naive_utc(),
            end: None,
            confidence: DateConfidence::Unresolved,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.confidence != DateConfidence::Unresolved
    }
}

/// Resolve free text to a date, falling back to an unresolved placeholder.
pub fn resolve(text: &str, locale: Locale, collected_at: DateTime<Utc>) -> ResolvedDate {
    try_resolve(text, locale, collected_at).unwrap_or_else(|| ResolvedDate::unresolved(collected_at))
}

/// Resolve free text to a date, or `None` when no rule applies.
pub fn try_resolve(text: &str, locale: Locale, collected_at: DateTime<Utc>) -> Option<ResolvedDate> {
    let text = prepare(text);
    if text.is_empty() {
        return None;
    }
    let anchor = collected_at.naive_utc().date();

    let matchers: [fn(&str, Locale, NaiveDate) -> Option<Found>; 6] = [
        iso,
        month_name_range,
        numeric_range,
        month_name_date,
        numeric_date,
        relative,
    ];

    matchers
        .iter()
        .find_map(|matcher| matcher(&text, locale, anchor))
        .map(|found| found.finish(&text))
}

fn prepare(text: &str) -> String {
    let lowered = text
        .to_lowercase()
        .replace(['–', '—', '−'], "-")
        .replace(['’', '`'], "'")
        .replace(['°', 'º', 'ª'], "");
    collapse_whitespace(&lowered)
}

/// A date match before times of day are applied.
#[derive(Debug)]
struct Found {
    start_day: NaiveDate,
    start_time: Option<NaiveTime>,
    end_day: Option<NaiveDate>,
    end_time: Option<NaiveTime>,
    confidence: DateConfidence,
    span: Range<usize>,
}

impl Found {
    fn days(start_day: NaiveDate, end_day: Option<NaiveDate>, confidence: DateConfidence, span: Range<usize>) -> Self {
        Self {
            start_day,
            start_time: None,
            end_day,
            end_time: None,
            confidence,
            span,
        }
    }

    fn finish(self, text: &str) -> ResolvedDate {
        let times = if self.start_time.is_some() {
            Vec::new()
        } else {
            let remainder = format!("{} {}", &text[..self.span.start], &text[self.span.end..]);
            extract_times(&remainder)
        };

        let start_time = self
            .start_time
            .or_else(|| times.first().copied())
            .unwrap_or(NaiveTime::MIN);
        let start = self.start_day.and_time(start_time);

        let end = match (self.end_day, self.end_time) {
            (Some(day), time) => Some(day.and_time(time.unwrap_or_else(end_of_day))),
            (None, Some(time)) => Some(self.start_day.and_time(time)),
            (None, None) => times.get(1).map(|&time| {
                if time > start_time {
                    self.start_day.and_time(time)
                } else {
                    // 22:00-02:00 runs past midnight
                    (self.start_day + Duration::days(1)).and_time(time)
                }
            }),
        };

        ResolvedDate {
            start,
            end: end.filter(|end| *end >= start),
            confidence: self.confidence,
        }
    }
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
}

fn month_number(word: &str) -> Option<u32> {
    let word = word.trim_end_matches('.');
    MONTHS.iter().find(|(name, _)| *name == word).map(|(_, m)| *m)
}

fn weekday_of(word: &str) -> Option<Weekday> {
    WEEKDAYS.iter().find(|(name, _)| *name == word).map(|(_, d)| *d)
}

fn number<T: std::str::FromStr>(caps: &Captures, name: &str) -> Option<T> {
    caps.name(name).and_then(|m| m.as_str().parse().ok())
}

fn year(caps: &Captures, name: &str) -> Option<Option<i32>> {
    match caps.name(name) {
        None => Some(None),
        Some(m) => match m.as_str().len() {
            2 => m.as_str().parse::<i32>().ok().map(|y| Some(2000 + y)),
            4 => m.as_str().parse::<i32>().ok().map(Some),
            _ => None,
        },
    }
}

/// Whether the digits at `start` are the minutes of a time like "21:30".
fn continues_time(text: &str, start: usize) -> bool {
    let bytes = text.as_bytes();
    start >= 2 && matches!(bytes[start - 1], b':' | b'.') && bytes[start - 2].is_ascii_digit()
}

/// Matches of `re` whose `day` group does not sit on the minutes of a time
/// of day. After such a false start the scan resumes past the minutes.
fn date_captures<'t>(re: &Regex, text: &'t str, day: &str) -> Vec<Captures<'t>> {
    let mut found = Vec::new();
    let mut at = 0;
    while at < text.len() {
        let Some(caps) = re.captures_at(text, at) else {
            break;
        };
        let Some(whole) = caps.get(0) else {
            break;
        };
        match caps.name(day) {
            Some(m) if continues_time(text, m.start()) => at = m.end(),
            _ => {
                at = whole.end().max(at + 1);
                found.push(caps);
            }
        }
        while !text.is_char_boundary(at) {
            at += 1;
        }
    }
    found
}

fn span(caps: &Captures) -> Range<usize> {
    caps.get(0).map(|m| m.range()).unwrap_or(0..0)
}

/// Place a yearless day/month relative to the anchor.
fn infer_year(month: u32, day: u32, anchor: NaiveDate) -> Option<NaiveDate> {
    match NaiveDate::from_ymd_opt(anchor.year(), month, day) {
        Some(date) if date >= anchor - Duration::days(YEAR_ROLLOVER_DAYS) => Some(date),
        _ => NaiveDate::from_ymd_opt(anchor.year() + 1, month, day),
    }
}

/// Build a start/end pair where either year may be missing.
fn build_range(
    (d1, m1, y1): (u32, u32, Option<i32>),
    (d2, m2, y2): (u32, u32, Option<i32>),
    anchor: NaiveDate,
) -> Option<(NaiveDate, NaiveDate)> {
    let start = match (y1, y2) {
        (Some(y), _) => NaiveDate::from_ymd_opt(y, m1, d1)?,
        (None, Some(y)) => {
            let start = NaiveDate::from_ymd_opt(y, m1, d1)?;
            if start > NaiveDate::from_ymd_opt(y, m2, d2)? {
                NaiveDate::from_ymd_opt(y - 1, m1, d1)?
            } else {
                start
            }
        }
        (None, None) => infer_year(m1, d1, anchor)?,
    };

    let end = match y2 {
        Some(y) => NaiveDate::from_ymd_opt(y, m2, d2)?,
        None => {
            let end = NaiveDate::from_ymd_opt(start.year(), m2, d2)?;
            if end < start {
                NaiveDate::from_ymd_opt(start.year() + 1, m2, d2)?
            } else {
                end
            }
        }
    };

    (end >= start).then_some((start, end))
}

fn previous_month(month: u32) -> u32 {
    if month == 1 {
        12
    } else {
        month - 1
    }
}

fn add_months(date: NaiveDate, months: u32) -> Option<NaiveDate> {
    date.checked_add_months(chrono::Months::new(months))
}

/// Read `a`/`b` as (day, month) per the locale. The flag is set when the
/// reading is not certain: both orders were valid and differ, or the locale's
/// order was impossible and the other one was used.
fn numeric_day_month(a: u32, b: u32, order: DateOrder) -> Option<(u32, u32, bool)> {
    let plausible = |day: u32, month: u32| (1..=12).contains(&month) && (1..=31).contains(&day);
    let day_first = plausible(a, b);
    let month_first = plausible(b, a);

    match order {
        DateOrder::DayFirst if day_first => Some((a, b, false)),
        DateOrder::MonthFirst if month_first => Some((b, a, false)),
        DateOrder::DayFirst if month_first => Some((b, a, true)),
        DateOrder::MonthFirst if day_first => Some((a, b, true)),
        DateOrder::Unknown if day_first => Some((a, b, month_first && a != b)),
        DateOrder::Unknown if month_first => Some((b, a, false)),
        _ => None,
    }
}

fn iso(text: &str, _locale: Locale, _anchor: NaiveDate) -> Option<Found> {
    let parse = |caps: &Captures| -> Option<(NaiveDate, Option<NaiveTime>, Range<usize>)> {
        let date = NaiveDate::from_ymd_opt(number(caps, "y")?, number(caps, "m")?, number(caps, "d")?)?;
        let time = match (number::<u32>(caps, "hh"), number::<u32>(caps, "mm")) {
            (Some(h), Some(m)) => Some(NaiveTime::from_hms_opt(h, m, 0)?),
            _ => None,
        };
        Some((date, time, span(caps)))
    };

    let mut matches = ISO.captures_iter(text).filter_map(|caps| parse(&caps));
    let (start_day, start_time, first_span) = matches.next()?;

    let mut found = Found {
        start_day,
        start_time,
        end_day: None,
        end_time: None,
        confidence: DateConfidence::Exact,
        span: first_span.clone(),
    };

    if let Some((end_day, end_time, last_span)) = matches.next() {
        if end_day >= start_day {
            found.end_day = Some(end_day);
            found.end_time = end_time;
            found.span = first_span.start..last_span.end;
        }
    }
    if found.start_time.is_none() && found.end_day.is_some() {
        found.start_time = Some(NaiveTime::MIN);
    }
    Some(found)
}

fn month_name_range(text: &str, _locale: Locale, anchor: NaiveDate) -> Option<Found> {
    let day_month = date_captures(&DAY_MONTH_RANGE, text, "d1").into_iter().find_map(|caps| {
        let d1 = number(&caps, "d1")?;
        let d2 = number(&caps, "d2")?;
        let m2 = month_number(caps.name("m2")?.as_str())?;
        let m1 = match caps.name("m1") {
            Some(m) => month_number(m.as_str())?,
            None if d1 <= d2 => m2,
            None => previous_month(m2),
        };
        let (start, end) = build_range((d1, m1, year(&caps, "y1")?), (d2, m2, year(&caps, "y2")?), anchor)?;
        Some(Found::days(start, Some(end), DateConfidence::Exact, span(&caps)))
    });
    if day_month.is_some() {
        return day_month;
    }

    MONTH_DAY_RANGE.captures_iter(text).find_map(|caps| {
        let d1 = number(&caps, "d1")?;
        let d2 = number(&caps, "d2")?;
        let m1 = month_number(caps.name("m1")?.as_str())?;
        let m2 = match caps.name("m2") {
            Some(m) => month_number(m.as_str())?,
            None => m1,
        };
        let (start, end) = build_range((d1, m1, year(&caps, "y1")?), (d2, m2, year(&caps, "y2")?), anchor)?;
        Some(Found::days(start, Some(end), DateConfidence::Exact, span(&caps)))
    })
}

fn numeric_range(text: &str, locale: Locale, anchor: NaiveDate) -> Option<Found> {
    date_captures(&NUMERIC_RANGE, text, "a1").into_iter().find_map(|caps| {
        let y1 = year(&caps, "y1")?;
        let y2 = year(&caps, "y2")?;
        // Without a year only slashes are trusted; "18.30" is a time.
        if (y1.is_none() && &caps["s1"] != "/") || (y2.is_none() && &caps["s2"] != "/") {
            return None;
        }
        let (d1, m1, unsure1) = numeric_day_month(number(&caps, "a1")?, number(&caps, "b1")?, locale.date_order)?;
        let (d2, m2, unsure2) = numeric_day_month(number(&caps, "a2")?, number(&caps, "b2")?, locale.date_order)?;
        let (start, end) = build_range((d1, m1, y1), (d2, m2, y2), anchor)?;
        let confidence = if unsure1 || unsure2 {
            DateConfidence::Approximate
        } else {
            DateConfidence::Exact
        };
        Some(Found::days(start, Some(end), confidence, span(&caps)))
    })
}

fn month_name_date(text: &str, _locale: Locale, anchor: NaiveDate) -> Option<Found> {
    let single = |caps: Captures| -> Option<Found> {
        let day = number(&caps, "d")?;
        let month = month_number(caps.name("m")?.as_str())?;
        let date = match year(&caps, "y")? {
            Some(y) => NaiveDate::from_ymd_opt(y, month, day)?,
            None => infer_year(month, day, anchor)?,
        };
        Some(Found::days(date, None, DateConfidence::Exact, span(&caps)))
    };

    date_captures(&DAY_MONTH, text, "d")
        .into_iter()
        .find_map(single)
        .or_else(|| MONTH_DAY.captures_iter(text).find_map(single))
}

fn numeric_date(text: &str, locale: Locale, anchor: NaiveDate) -> Option<Found> {
    date_captures(&NUMERIC, text, "a").into_iter().find_map(|caps| {
        let y = year(&caps, "y")?;
        if y.is_none() && &caps["s"] != "/" {
            return None;
        }
        let (day, month, unsure) = numeric_day_month(number(&caps, "a")?, number(&caps, "b")?, locale.date_order)?;
        let date = match y {
            Some(y) => NaiveDate::from_ymd_opt(y, month, day)?,
            None => infer_year(month, day, anchor)?,
        };
        let confidence = if unsure {
            DateConfidence::Approximate
        } else {
            DateConfidence::Exact
        };
        Some(Found::days(date, None, confidence, span(&caps)))
    })
}

fn relative(text: &str, _locale: Locale, anchor: NaiveDate) -> Option<Found> {
    if let Some(caps) = DAY_ONLY_RANGE.captures(text) {
        if let Some(found) = day_only_range(&caps, anchor) {
            return Some(found);
        }
    }

    if let Some(caps) = NEAR_DAY.captures(text) {
        let offset = match &caps["w"] {
            "domani" | "tomorrow" => 1,
            "dopodomani" => 2,
            _ => 0,
        };
        let day = anchor + Duration::days(offset);
        return Some(Found::days(day, None, DateConfidence::Exact, span(&caps)));
    }

    if let Some(caps) = WEEKEND.captures(text) {
        let today = anchor.weekday().num_days_from_monday() as i64;
        let (start, end) = if today == 6 && caps.name("next").is_none() {
            // Sunday: only what is left of this weekend
            (anchor, anchor)
        } else {
            let mut to_saturday = (5 - today).rem_euclid(7);
            if caps.name("next").is_some() && today == 5 {
                to_saturday += 7;
            }
            let saturday = anchor + Duration::days(to_saturday);
            (saturday, saturday + Duration::days(1))
        };
        return Some(Found::days(start, Some(end), DateConfidence::Approximate, span(&caps)));
    }

    let caps = WEEKDAY_NAME.captures(text)?;
    let target = weekday_of(&caps["wd"])?;
    let mut ahead = (target.num_days_from_monday() as i64 - anchor.weekday().num_days_from_monday() as i64)
        .rem_euclid(7);
    if ahead == 0 && caps.name("next").is_some() {
        ahead = 7;
    }
    Some(Found::days(
        anchor + Duration::days(ahead),
        None,
        DateConfidence::Approximate,
        span(&caps),
    ))
}

/// "dal 5 al 10": days of the anchor's month, or the next month when the
/// whole range is already behind the anchor.
fn day_only_range(caps: &Captures, anchor: NaiveDate) -> Option<Found> {
    let d1: u32 = number(caps, "d1")?;
    let d2: u32 = number(caps, "d2")?;
    let month_start = anchor.with_day(1)?;

    let place = |month_start: NaiveDate| -> Option<(NaiveDate, NaiveDate)> {
        let start = month_start.with_day(d1)?;
        let end_month = if d2 < d1 { add_months(month_start, 1)? } else { month_start };
        Some((start, end_month.with_day(d2)?))
    };

    let (mut start, mut end) = place(month_start)?;
    if end < anchor {
        (start, end) = place(add_months(month_start, 1)?)?;
    }
    Some(Found::days(start, Some(end), DateConfidence::Approximate, span(caps)))
}

/// Times of day in order of appearance, at most two.
fn extract_times(text: &str) -> Vec<NaiveTime> {
    TIME_OF_DAY
        .captures_iter(text)
        .filter(|caps| caps.name("kw").is_some() || caps.name("min").is_some() || caps.name("ap").is_some())
        .filter_map(|caps| {
            let mut hour: u32 = number(&caps, "h")?;
            let minute: u32 = number(&caps, "min").unwrap_or(0);
            match caps.name("ap").map(|m| m.as_str()) {
                Some(suffix) => {
                    if !(1..=12).contains(&hour) {
                        return None;
                    }
                    hour %= 12;
                    if suffix == "pm" {
                        hour += 12;
                    }
                }
                None if hour > 23 => return None,
                None => {}
            }
            NaiveTime::from_hms_opt(hour, minute, 0)
        })
        .take(2)
        .collect()
}
