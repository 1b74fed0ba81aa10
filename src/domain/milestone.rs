// Policy milestones annotated on every panel
use chrono::{Duration, NaiveDate};

#[derive(Debug, Clone, PartialEq)]
pub struct Milestone {
    pub date: NaiveDate,
    /// Events sharing a group are drawn in a common, lighter style
    pub group: Option<&'static str>,
    pub label: &'static str,
}

impl Milestone {
    const fn new(date: NaiveDate, group: Option<&'static str>, label: &'static str) -> Self {
        Self { date, group, label }
    }

    /// Date the marker is drawn at on a panel whose series lag by `lag_days`
    pub fn shifted(&self, lag_days: i64) -> NaiveDate {
        self.date + Duration::days(lag_days)
    }
}

const SCHOOL_BREAK: Option<&str> = Some("school-break");

const fn day(year: i32, month: u32, day: u32) -> NaiveDate {
    match NaiveDate::from_ymd_opt(year, month, day) {
        Some(date) => date,
        None => panic!("invalid milestone date"),
    }
}

/// Measures taken in Sweden in spring 2020, plus school breaks.
pub const MILESTONES: [Milestone; 15] = [
    Milestone::new(day(2020, 3, 4), None, "new test strategy"),
    Milestone::new(day(2020, 3, 11), None, "limited public gatherings to 500 persons"),
    Milestone::new(day(2020, 3, 13), None, "waivered sick certificates"),
    Milestone::new(day(2020, 3, 16), None, "recommended social distancing for 70+"),
    Milestone::new(day(2020, 3, 17), None, "recommended work from home and distance learning"),
    Milestone::new(day(2020, 3, 18), None, "recommended travelling avoidance"),
    Milestone::new(day(2020, 3, 24), None, "mandated distance for restaurant tables"),
    Milestone::new(day(2020, 3, 27), None, "limited public gatherings to 50 persons"),
    Milestone::new(day(2020, 4, 1), None, "closed nursing homes to visitors"),
    Milestone::new(day(2020, 4, 4), SCHOOL_BREAK, "start of easter school break in stockholm"),
    Milestone::new(day(2020, 4, 10), SCHOOL_BREAK, "start of easter school breaks in north and south sweden"),
    Milestone::new(day(2020, 4, 14), SCHOOL_BREAK, "end of easter school breaks"),
    Milestone::new(day(2020, 4, 18), SCHOOL_BREAK, "start of easter school break in central sweden"),
    Milestone::new(day(2020, 4, 23), SCHOOL_BREAK, "end of easter school break in central sweden"),
    Milestone::new(day(2020, 5, 1), None, "may first"),
];
