//! Rule-based signals computed beside the model verdict
//!
//! - urgency: 0..=100 from urgent words, action words, "...까지" deadlines and
//!   how soon an extracted event starts
//! - event time: best-effort start/end read from the body once forwarded
//!   header blocks are stripped, so a quoted `Sent:` time is never taken for
//!   the meeting time
//!
//! Dates without a year use the year of `now` in the configured local offset.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

const MINUTES_PER_DAY: u32 = 24 * 60;

static HEADER_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(from|to|cc|bcc|sent|date|subject)\s*:\s*.+$")
        .expect("valid header regex")
});

static KO_HEADER_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(보낸사람|받는사람|참조|숨은참조|제목|보낸\s*날짜|날짜|발신|수신)\s*:\s*.+$")
        .expect("valid Korean header regex")
});

static SEPARATOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(-{2,}\s*original message\s*-{2,}|-{2,}\s*원본\s*메시지\s*-{2,}|_{2,}|={2,})\s*$")
        .expect("valid separator regex")
});

static LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(일시|시간|일정|\bwhen|\bdate)\s*[:：]").expect("valid label regex")
});

static YMD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<y>\d{4})\s*[./-]\s*(?P<m>\d{1,2})\s*[./-]\s*(?P<d>\d{1,2})")
        .expect("valid ymd regex")
});

static KO_MD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<m>\d{1,2})\s*월\s*(?P<d>\d{1,2})\s*일").expect("valid Korean date regex")
});

static MD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<m>\d{1,2})\s*[./-]\s*(?P<d>\d{1,2})(?:\D|$)").expect("valid md regex")
});

static RELATIVE_DAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(오늘|내일|모레)").expect("valid relative day regex"));

static WEEKDAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(월|화|수|목|금|토|일)\s*요일").expect("valid weekday regex"));

static TIME_24_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<h>\d{1,2})\s*[:.]\s*(?P<mi>\d{2})").expect("valid 24h time regex")
});

static TIME_KO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<ampm>오전|오후)?\s*(?P<h>\d{1,2})\s*시(?:\s*(?P<mi>\d{1,2})\s*분)?\s*(?P<half>반)?")
        .expect("valid Korean time regex")
});

const RANGE_CONNECTOR: &str = r"\s*(?:~|〜|\x{2013}|\x{2014}|-|to|부터)\s*";

static RANGE_24_RE: Lazy<Regex> = Lazy::new(|| {
    let time = r"\b\d{1,2}\s*[:.]\s*\d{2}";
    Regex::new(&format!(
        r"(?i)(?P<t1>{t}){c}(?P<t2>{t})",
        t = time,
        c = RANGE_CONNECTOR
    ))
    .expect("valid 24h range regex")
});

static RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    let time = r"(?:오전|오후)?\s*\d{1,2}(?:\s*[:.]\s*\d{2}|\s*시(?:\s*\d{1,2}\s*분)?\s*(?:반)?)?";
    Regex::new(&format!(
        r"(?i)(?P<t1>{t}){c}(?P<t2>{t})",
        t = time,
        c = RANGE_CONNECTOR
    ))
    .expect("valid range regex")
});

static ANY_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:오전|오후)\s*\d{1,2}\s*시(?:\s*\d{1,2}\s*분)?\s*(?:반)?|\d{1,2}\s*[:.]\s*\d{2}|\d{1,2}\s*시(?:\s*\d{1,2}\s*분)?\s*(?:반)?")
        .expect("valid time token regex")
});

// "오후 6시까지", "18:00까지", "12. 12.(금) 오후 6시까지"
static DEADLINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\b\d{1,2}:\d{2}|\b\d{1,2}\s*시(?:\s*\d{1,2}\s*분)?).*?까지")
        .expect("valid deadline regex")
});

const URGENT_WORDS: &[(&str, u32)] = &[
    ("긴급", 25),
    ("asap", 25),
    ("urgent", 25),
    ("즉시", 20),
    ("최대한 빨리", 20),
    ("중요", 10),
    ("오늘까지", 25),
    ("금일", 10),
    ("내일", 10),
    ("마감", 15),
    ("기한", 15),
    ("deadline", 15),
    ("eod", 15),
];

const ACTION_WORDS: &[(&str, u32)] = &[
    ("회신", 12),
    ("확인", 10),
    ("검토", 10),
    ("승인", 10),
    ("제출", 15),
    ("답변", 10),
    ("수정", 8),
    ("작성", 8),
    ("please reply", 12),
    ("submit", 15),
    ("approve", 10),
];

const DEADLINE_POINTS: u32 = 35;

/// Extracted event span, in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventTime {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Rule-based signals for one message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageAnalysis {
    pub urgency: u8,
    pub event: Option<EventTime>,
}

/// Analyse a message as of `now`, reading wall-clock times in `offset`
pub fn analyze(subject: &str, body: &str, now: DateTime<Utc>, offset: FixedOffset) -> MessageAnalysis {
    let event = extract_event_times(body, now, offset);
    let text = format!("{}\n{}", subject, body);
    MessageAnalysis {
        urgency: compute_urgency(&text, event.map(|e| e.start), now),
        event,
    }
}

/// Drop forwarded/reply header lines, keeping the message's own content
pub fn clean_for_datetime(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for raw in text.split('\n') {
        let line = raw.trim_end_matches('\r').trim_start_matches('\u{feff}');
        if line.trim().is_empty() || SEPARATOR_RE.is_match(line) {
            if lines.last().map_or(false, |l| l.is_empty()) {
                continue;
            }
            lines.push("");
            continue;
        }
        if HEADER_LINE_RE.is_match(line) || KO_HEADER_LINE_RE.is_match(line) {
            continue;
        }
        lines.push(line);
    }
    lines.join("\n").trim().to_string()
}

/// Best-effort event start/end.
///
/// Lines labelled `일시:`/`When:` and the like are read first so a reply
/// deadline elsewhere in the body does not win. A date with no time becomes
/// an all-day event.
pub fn extract_event_times(
    text: &str,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Option<EventTime> {
    let cleaned = clean_for_datetime(text);
    if cleaned.is_empty() {
        return None;
    }
    let today = now.with_timezone(&offset).date_naive();

    let (labeled, others): (Vec<&str>, Vec<&str>) =
        cleaned.lines().partition(|l| LABEL_RE.is_match(l));

    let mut current: Option<NaiveDate> = None;
    for line in labeled.into_iter().chain(others) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(date) = parse_date(line, today) {
            current = Some(date);
        }
        let Some(date) = current else {
            continue;
        };

        for caps in RANGE_24_RE.captures_iter(line) {
            if let (Some(t1), Some(t2)) = (parse_time(&caps["t1"]), parse_time(&caps["t2"])) {
                return span(date, t1, t2, offset);
            }
        }

        for caps in RANGE_RE.captures_iter(line) {
            if let (Some(t1), Some(t2)) = (parse_time(&caps["t1"]), parse_time(&caps["t2"])) {
                let t2 = choose_range_end(t1, t2, &caps["t1"], &caps["t2"]);
                return span(date, t1, t2, offset);
            }
        }

        if let Some(t) = parse_time(line) {
            let start = local_time(date, t, offset)?;
            return Some(EventTime {
                start,
                end: start + Duration::hours(1),
            });
        }
    }

    // No line had both a date and a time: fall back to the whole text
    let date = parse_date(&cleaned, today)?;
    let mut times: Vec<u32> = Vec::new();
    for m in ANY_TIME_RE.find_iter(&cleaned) {
        if let Some(t) = parse_time(m.as_str()) {
            if !times.contains(&t) {
                times.push(t);
            }
        }
    }

    match times.as_slice() {
        [first, second, ..] => {
            let start = local_time(date, *first, offset)?;
            let end = local_time(date, *second, offset)?;
            let end = if end <= start { start + Duration::hours(1) } else { end };
            Some(EventTime { start, end })
        }
        [only] => {
            let start = local_time(date, *only, offset)?;
            Some(EventTime {
                start,
                end: start + Duration::hours(1),
            })
        }
        [] => {
            let start = local_time(date, 0, offset)?;
            Some(EventTime {
                start,
                end: start + Duration::days(1),
            })
        }
    }
}

/// Urgency score in 0..=100
pub fn compute_urgency(text: &str, event_start: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u8 {
    let normalized = text.replace('\u{a0}', " ").to_lowercase();

    let mut score: u32 = URGENT_WORDS
        .iter()
        .chain(ACTION_WORDS)
        .filter(|(word, _)| normalized.contains(word))
        .map(|(_, points)| points)
        .sum();

    if DEADLINE_RE.is_match(text) {
        score += DEADLINE_POINTS;
    }

    if let Some(start) = event_start {
        let minutes = (start - now).num_minutes();
        score += match minutes {
            0..=60 => 45,
            61..=120 => 35,
            121..=1440 => 20,
            _ => 0,
        };
    }

    score.min(100) as u8
}

fn parse_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    if let Some(c) = YMD_RE.captures(text) {
        return NaiveDate::from_ymd_opt(c["y"].parse().ok()?, c["m"].parse().ok()?, c["d"].parse().ok()?);
    }
    if let Some(c) = KO_MD_RE.captures(text) {
        return NaiveDate::from_ymd_opt(today.year(), c["m"].parse().ok()?, c["d"].parse().ok()?);
    }
    if let Some(c) = MD_RE.captures(text) {
        return NaiveDate::from_ymd_opt(today.year(), c["m"].parse().ok()?, c["d"].parse().ok()?);
    }
    if let Some(c) = RELATIVE_DAY_RE.captures(text) {
        let days = match &c[1] {
            "오늘" => 0,
            "내일" => 1,
            _ => 2,
        };
        return today.checked_add_signed(Duration::days(days));
    }
    if let Some(c) = WEEKDAY_RE.captures(text) {
        let target = "월화수목금토일".chars().position(|d| c[1].starts_with(d))? as i64;
        let current = today.weekday().num_days_from_monday() as i64;
        return today.checked_add_signed(Duration::days((target - current).rem_euclid(7)));
    }
    None
}

/// Minutes since midnight
fn parse_time(text: &str) -> Option<u32> {
    for c in TIME_24_RE.captures_iter(text) {
        let (h, mi): (u32, u32) = (c["h"].parse().ok()?, c["mi"].parse().ok()?);
        if h <= 23 && mi <= 59 {
            return Some(h * 60 + mi);
        }
    }

    let c = TIME_KO_RE.captures(text)?;
    let mut h: u32 = c["h"].parse().ok()?;
    let mut mi: u32 = match c.name("mi") {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    if c.name("half").is_some() && mi == 0 {
        mi = 30;
    }
    if h > 23 || mi > 59 {
        return None;
    }
    match c.name("ampm").map(|m| m.as_str()) {
        Some("오후") if h < 12 => h += 12,
        Some("오전") if h == 12 => h = 0,
        _ => {}
    }
    Some(h * 60 + mi)
}

/// "오후 6시~9시" means 18:00 to 21:00: an end token with no 오전/오후 after
/// an afternoon start may take the afternoon too, if that gives a plausible
/// duration (5 minutes to 10 hours).
fn choose_range_end(t1: u32, t2: u32, token1: &str, token2: &str) -> u32 {
    let mut candidates = vec![t2];
    let bare_end = !token2.contains("오전") && !token2.contains("오후");
    if token1.contains("오후") && bare_end && t2 < 12 * 60 {
        candidates.push(t2 + 12 * 60);
    }

    let mut best = (t2, None::<u32>);
    for candidate in candidates {
        let mut end = candidate;
        while end <= t1 {
            end += MINUTES_PER_DAY;
        }
        let duration = end - t1;
        if (5..=600).contains(&duration) && best.1.map_or(true, |d| duration < d) {
            best = (candidate, Some(duration));
        }
    }
    best.0
}

fn span(date: NaiveDate, t1: u32, t2: u32, offset: FixedOffset) -> Option<EventTime> {
    let start = local_time(date, t1, offset)?;
    let end_minutes = if t2 <= t1 { t2 + MINUTES_PER_DAY } else { t2 };
    let end = local_time(date, end_minutes, offset)?;
    let end = if end <= start { start + Duration::hours(1) } else { end };
    Some(EventTime { start, end })
}

/// `minutes` may spill past midnight into the following days
fn local_time(date: NaiveDate, minutes: u32, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let date = date.checked_add_signed(Duration::days((minutes / MINUTES_PER_DAY) as i64))?;
    let minutes = minutes % MINUTES_PER_DAY;
    let naive = date.and_hms_opt(minutes / 60, minutes % 60, 0)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kst() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    // Friday 2026-01-16 09:00 KST
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 16, 0, 0, 0).unwrap()
    }

    fn kst_time(y: i32, m: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        kst()
            .with_ymd_and_hms(y, m, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_labeled_korean_range_with_afternoon_end() {
        let body = "안녕하세요.\n\n일시: 2026. 1. 20.(화) 오후 2시 ~ 4시\n장소: 3층 회의실";
        let event = extract_event_times(body, now(), kst()).unwrap();
        assert_eq!(event.start, kst_time(2026, 1, 20, 14, 0));
        assert_eq!(event.end, kst_time(2026, 1, 20, 16, 0));
    }

    #[test]
    fn test_24_hour_range_next_to_iso_date() {
        let body = "Kickoff on 2026-01-20 14:00-16:30, room B";
        let event = extract_event_times(body, now(), kst()).unwrap();
        assert_eq!(event.start, kst_time(2026, 1, 20, 14, 0));
        assert_eq!(event.end, kst_time(2026, 1, 20, 16, 30));
    }

    #[test]
    fn test_forwarded_sent_header_is_ignored() {
        let body = "회의 안내입니다.\n일시: 1월 22일 10:00\n\n-----Original Message-----\nFrom: kim@example.com\nSent: 2026-01-16 18:04\nSubject: 회의";
        let event = extract_event_times(body, now(), kst()).unwrap();
        assert_eq!(event.start, kst_time(2026, 1, 22, 10, 0));
        assert_eq!(event.end, kst_time(2026, 1, 22, 11, 0));
    }

    #[test]
    fn test_relative_day_and_weekday() {
        let tomorrow = extract_event_times("내일 오전 10시반 미팅", now(), kst()).unwrap();
        assert_eq!(tomorrow.start, kst_time(2026, 1, 17, 10, 30));

        // Friday today, so 월요일 is three days out
        let monday = extract_event_times("월요일 15:00 리뷰", now(), kst()).unwrap();
        assert_eq!(monday.start, kst_time(2026, 1, 19, 15, 0));
    }

    #[test]
    fn test_date_only_is_all_day() {
        let event = extract_event_times("워크숍은 3월 4일입니다", now(), kst()).unwrap();
        assert_eq!(event.start, kst_time(2026, 3, 4, 0, 0));
        assert_eq!(event.end - event.start, Duration::days(1));
    }

    #[test]
    fn test_no_date_means_no_event() {
        assert_eq!(extract_event_times("Thanks for the update!", now(), kst()), None);
        assert_eq!(extract_event_times("", now(), kst()), None);
    }

    #[test]
    fn test_offset_changes_utc_instant() {
        let utc = extract_event_times("2026-01-20 14:00", now(), FixedOffset::east_opt(0).unwrap())
            .unwrap();
        assert_eq!(utc.start, Utc.with_ymd_and_hms(2026, 1, 20, 14, 0, 0).unwrap());
    }

    #[test]
    fn test_urgency_scoring() {
        assert_eq!(compute_urgency("Lunch photos", None, now()), 0);
        // 긴급 25 + 회신 12
        assert_eq!(compute_urgency("[긴급] 회신 부탁드립니다", None, now()), 37);
        // 제출 15 + deadline phrase 35
        assert_eq!(compute_urgency("보고서 오후 6시까지 제출", None, now()), 50);
        assert_eq!(
            compute_urgency("긴급 즉시 마감 기한 제출 회신 ASAP 18:00까지", None, now()),
            100
        );
    }

    #[test]
    fn test_urgency_rises_as_event_approaches() {
        let soon = now() + Duration::minutes(30);
        let later = now() + Duration::hours(2);
        let tomorrow = now() + Duration::hours(20);
        let past = now() - Duration::hours(1);
        assert_eq!(compute_urgency("sync", Some(soon), now()), 45);
        assert_eq!(compute_urgency("sync", Some(later), now()), 35);
        assert_eq!(compute_urgency("sync", Some(tomorrow), now()), 20);
        assert_eq!(compute_urgency("sync", Some(past), now()), 0);
    }

    #[test]
    fn test_analyze_combines_subject_and_body() {
        let analysis = analyze("[긴급] 검토 요청", "일시: 2026-01-16 10:00", now(), kst());
        let event = analysis.event.unwrap();
        assert_eq!(event.start, kst_time(2026, 1, 16, 10, 0));
        // 긴급 25 + 검토 10 + event within the hour 45
        assert_eq!(analysis.urgency, 80);
    }
}
