use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use proptest::prelude::*;

use borgsched::schedule::CronSchedule;

const ZONES: &[&str] = &[
    "UTC",
    "Europe/Oslo",
    "America/New_York",
    "Asia/Kolkata",
    "Australia/Lord_Howe",
];

fn instant_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    // 2020-01-01 .. 2030-01-01, second resolution.
    (1_577_836_800i64..1_893_456_000i64).prop_map(|secs| Utc.timestamp_opt(secs, 0).unwrap())
}

fn daily_expr_strategy() -> impl Strategy<Value = String> {
    let minute = prop_oneof![
        (0u32..60).prop_map(|m| m.to_string()),
        prop::sample::select(vec![5u32, 10, 15, 20, 30]).prop_map(|s| format!("*/{s}")),
    ];
    let hour = prop_oneof![
        (0u32..24).prop_map(|h| h.to_string()),
        Just("*".to_string()),
        (0u32..12).prop_map(|h| format!("{h},{}", h + 12)),
    ];
    (minute, hour).prop_map(|(m, h)| format!("{m} {h} * * *"))
}

/// Whether the schedule should fire at UTC minute `at`: the local wall time
/// matches and `at` is the earliest instant with that wall time.
fn fires_at(schedule: &CronSchedule, tz: Tz, at: DateTime<Utc>) -> bool {
    let local = at.with_timezone(&tz).naive_local();
    schedule.expr().matches(&local)
        && tz
            .from_local_datetime(&local)
            .earliest()
            .is_some_and(|first| first.with_timezone(&Utc) == at)
}

fn next_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    let floored = t - Duration::seconds(t.second() as i64) - Duration::nanoseconds(t.nanosecond() as i64);
    floored + Duration::minutes(1)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn next_fire_is_the_first_matching_minute_after_now(
        expr in daily_expr_strategy(),
        zone in prop::sample::select(ZONES),
        now in instant_strategy(),
    ) {
        let tz: Tz = zone.parse().unwrap();
        let schedule = CronSchedule::parse(&expr, zone).unwrap();

        let next = schedule.next_after(now).expect("daily schedules always fire");

        prop_assert!(next > now);
        prop_assert_eq!(next.second(), 0);
        prop_assert!(fires_at(&schedule, tz, next), "{} does not fire at {}", expr, next);

        let mut at = next_minute(now);
        while at < next {
            prop_assert!(!fires_at(&schedule, tz, at), "{} skipped {} (got {})", expr, at, next);
            at += Duration::minutes(1);
        }
    }

    #[test]
    fn weekly_schedules_land_on_their_weekday(
        minute in 0u32..60,
        hour in 0u32..24,
        dow in 0u32..=7,
        zone in prop::sample::select(ZONES),
        now in instant_strategy(),
    ) {
        let tz: Tz = zone.parse().unwrap();
        let expr = format!("{minute} {hour} * * {dow}");
        let schedule = CronSchedule::parse(&expr, zone).unwrap();

        let next = schedule.next_after(now).unwrap();
        let local = next.with_timezone(&tz);

        prop_assert!(next > now);
        // One skipped week at most, when the wall time falls in a DST gap.
        prop_assert!(next - now <= Duration::days(15));
        prop_assert_eq!(local.weekday().num_days_from_sunday(), dow % 7);
        prop_assert_eq!(local.minute(), minute);
    }

    #[test]
    fn next_after_is_monotonic(
        expr in daily_expr_strategy(),
        zone in prop::sample::select(ZONES),
        now in instant_strategy(),
    ) {
        let schedule = CronSchedule::parse(&expr, zone).unwrap();
        let first = schedule.next_after(now).unwrap();
        let second = schedule.next_after(first).unwrap();
        prop_assert!(second > first);
        // Asking again from just before the first fire returns it unchanged.
        prop_assert_eq!(schedule.next_after(first - Duration::seconds(1)), Some(first));
    }
}
