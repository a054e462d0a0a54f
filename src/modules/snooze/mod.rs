// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use chrono::{DateTime, Datelike, Duration, Local, TimeZone, Timelike, Weekday};
use tracing::info;

use crate::{
    modules::{
        database::{insert_impl, manager::DB_MANAGER, with_transaction},
        envelope::entity::EmailEnvelope,
        error::{code::ErrorCode, PostroomResult},
        events::{
            payload::{EventPayload, EventType, MailEvent},
            EVENT_BUS,
        },
        snooze::entity::{SnoozeEntry, SnoozeEntryKey, SnoozePreset},
    },
    raise_error, utc_now,
};

pub mod entity;

/// Hides an email until `snooze_until`: the row is marked read so inbox
/// queries skip it, and a snooze entry carries the wake time. A previous
/// active snooze on the same email is superseded.
pub async fn snooze(
    account_id: u64,
    email_id: u64,
    snooze_until: i64,
    preset: SnoozePreset,
) -> PostroomResult<SnoozeEntry> {
    if snooze_until <= utc_now!() {
        return Err(raise_error!(
            "Snooze time must be in the future".into(),
            ErrorCode::InvalidParameter
        ));
    }
    let email = EmailEnvelope::get(email_id).await?;

    if let Some(previous) = SnoozeEntry::active_for_email(email_id).await? {
        mark_processed(previous.id).await?;
    }

    let entry = SnoozeEntry::new(account_id, email_id, snooze_until, preset, email.flags.seen);
    insert_impl(DB_MANAGER.meta_db(), entry.clone()).await?;
    EmailEnvelope::mark_as_read(email_id, true).await?;

    EVENT_BUS.publish(MailEvent::new(
        EventType::EmailSnoozed,
        account_id,
        EventPayload::Snooze {
            email_id,
            snooze_until: Some(snooze_until),
        },
    ));
    Ok(entry)
}

/// Manually wakes a snoozed email before its time: the pre-snooze read
/// state is restored and the entry is consumed.
pub async fn unsnooze(account_id: u64, email_id: u64) -> PostroomResult<()> {
    let entry = SnoozeEntry::active_for_email(email_id).await?.ok_or_else(|| {
        raise_error!(
            format!("Email '{email_id}' has no active snooze"),
            ErrorCode::ResourceNotFound
        )
    })?;

    mark_processed(entry.id).await?;
    EmailEnvelope::mark_as_read(email_id, entry.was_seen).await?;

    EVENT_BUS.publish(MailEvent::new(
        EventType::EmailUnsnoozed,
        account_id,
        EventPayload::Snooze {
            email_id,
            snooze_until: None,
        },
    ));
    Ok(())
}

/// Periodic wakeup: every entry whose time has passed marks its email
/// unread and bumps it to the top of display order. Processed entries are
/// skipped, so a re-run is a no-op.
pub async fn process_due_snoozes() -> PostroomResult<usize> {
    let now = utc_now!();
    let due: Vec<SnoozeEntry> =
        crate::modules::database::list_all_impl::<SnoozeEntry>(DB_MANAGER.meta_db())
            .await?
            .into_iter()
            .filter(|s| !s.processed && s.snooze_until <= now)
            .collect();

    let mut woken = 0usize;
    for entry in due {
        EmailEnvelope::mark_as_read(entry.email_id, false).await?;
        EmailEnvelope::bump_sort_key(entry.email_id, now).await?;
        mark_processed(entry.id).await?;

        EVENT_BUS.publish(MailEvent::new(
            EventType::EmailUnsnoozed,
            entry.account_id,
            EventPayload::Snooze {
                email_id: entry.email_id,
                snooze_until: None,
            },
        ));
        woken += 1;
    }
    if woken > 0 {
        info!("Woke {} snoozed emails", woken);
    }
    Ok(woken)
}

async fn mark_processed(entry_id: u64) -> PostroomResult<()> {
    with_transaction(DB_MANAGER.meta_db(), move |rw| {
        let current: SnoozeEntry = rw
            .get()
            .secondary(SnoozeEntryKey::id, entry_id)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
            .ok_or_else(|| {
                raise_error!(
                    format!("Snooze entry '{entry_id}' not found"),
                    ErrorCode::ResourceNotFound
                )
            })?;
        if current.processed {
            return Ok(());
        }
        let mut updated = current.clone();
        updated.processed = true;
        rw.update(current, updated)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        Ok(())
    })
    .await
}

/// Resolves a preset to a concrete local wake time relative to `now`.
pub fn resolve_preset(preset: SnoozePreset, now: DateTime<Local>) -> DateTime<Local> {
    match preset {
        SnoozePreset::LaterToday => {
            let in_four_hours = now + Duration::hours(4);
            let four_pm = at_time(now, 16, 0);
            in_four_hours.min(four_pm)
        }
        SnoozePreset::Tomorrow => at_time(now + Duration::days(1), 9, 0),
        SnoozePreset::ThisWeekend => at_time(next_weekday(now, Weekday::Sat), 9, 0),
        SnoozePreset::NextWeek => at_time(next_weekday(now, Weekday::Mon), 9, 0),
        SnoozePreset::NextMonth => {
            let (year, month) = if now.month() == 12 {
                (now.year() + 1, 1)
            } else {
                (now.year(), now.month() + 1)
            };
            Local
                .with_ymd_and_hms(year, month, 1, 9, 0, 0)
                .single()
                .unwrap_or(now)
        }
        SnoozePreset::Custom => now,
    }
}

fn at_time(day: DateTime<Local>, hour: u32, minute: u32) -> DateTime<Local> {
    day.with_hour(hour)
        .and_then(|d| d.with_minute(minute))
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(day)
}

fn next_weekday(now: DateTime<Local>, target: Weekday) -> DateTime<Local> {
    let mut day = now + Duration::days(1);
    while day.weekday() != target {
        day += Duration::days(1);
    }
    day
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id;
    use crate::modules::envelope::entity::tests::test_envelope;

    #[test]
    fn presets_resolve_relative_to_now() {
        // Wednesday 2025-03-12 10:30 local.
        let now = Local.with_ymd_and_hms(2025, 3, 12, 10, 30, 0).unwrap();

        let later = resolve_preset(SnoozePreset::LaterToday, now);
        assert_eq!((later.hour(), later.minute()), (14, 30));

        // Late afternoon clamps to 16:00.
        let afternoon = Local.with_ymd_and_hms(2025, 3, 12, 15, 0, 0).unwrap();
        let clamped = resolve_preset(SnoozePreset::LaterToday, afternoon);
        assert_eq!((clamped.hour(), clamped.minute()), (16, 0));

        let tomorrow = resolve_preset(SnoozePreset::Tomorrow, now);
        assert_eq!((tomorrow.day(), tomorrow.hour()), (13, 9));

        let weekend = resolve_preset(SnoozePreset::ThisWeekend, now);
        assert_eq!(weekend.weekday(), Weekday::Sat);
        assert_eq!((weekend.day(), weekend.hour()), (15, 9));

        let next_week = resolve_preset(SnoozePreset::NextWeek, now);
        assert_eq!(next_week.weekday(), Weekday::Mon);
        assert_eq!((next_week.day(), next_week.hour()), (17, 9));

        let next_month = resolve_preset(SnoozePreset::NextMonth, now);
        assert_eq!(
            (next_month.year(), next_month.month(), next_month.day(), next_month.hour()),
            (2025, 4, 1, 9)
        );
    }

    #[test]
    fn december_rolls_into_january() {
        let now = Local.with_ymd_and_hms(2025, 12, 20, 12, 0, 0).unwrap();
        let next_month = resolve_preset(SnoozePreset::NextMonth, now);
        assert_eq!((next_month.year(), next_month.month()), (2026, 1));
    }

    #[tokio::test]
    async fn snooze_hides_and_wakeup_restores_and_bumps() {
        let account_id = id!(64);
        let outcome = EmailEnvelope::upsert(test_envelope(account_id, "INBOX", 700))
            .await
            .unwrap();
        let before = EmailEnvelope::get(outcome.entry_id).await.unwrap();
        assert!(!before.flags.seen);

        snooze(
            account_id,
            outcome.entry_id,
            utc_now!() - 1, // rejected
            SnoozePreset::Custom,
        )
        .await
        .unwrap_err();

        snooze(
            account_id,
            outcome.entry_id,
            utc_now!() + 50,
            SnoozePreset::Custom,
        )
        .await
        .unwrap();
        assert!(EmailEnvelope::get(outcome.entry_id).await.unwrap().flags.seen);

        // Wait until due, then wake.
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        let woken = process_due_snoozes().await.unwrap();
        assert!(woken >= 1);

        let after = EmailEnvelope::get(outcome.entry_id).await.unwrap();
        assert!(!after.flags.seen);
        assert!(after.sort_key > before.sort_key);

        // Idempotent: processed entries are skipped.
        let before_rerun = EmailEnvelope::get(outcome.entry_id).await.unwrap();
        process_due_snoozes().await.unwrap();
        let after_rerun = EmailEnvelope::get(outcome.entry_id).await.unwrap();
        assert_eq!(before_rerun, after_rerun);
    }

    #[tokio::test]
    async fn unsnooze_restores_the_presnooze_state() {
        let account_id = id!(64);
        let outcome = EmailEnvelope::upsert(test_envelope(account_id, "INBOX", 701))
            .await
            .unwrap();
        EmailEnvelope::mark_as_read(outcome.entry_id, true)
            .await
            .unwrap();
        let before = EmailEnvelope::get(outcome.entry_id).await.unwrap().flags;

        snooze(
            account_id,
            outcome.entry_id,
            utc_now!() + 3_600_000,
            SnoozePreset::Tomorrow,
        )
        .await
        .unwrap();
        unsnooze(account_id, outcome.entry_id).await.unwrap();

        let after = EmailEnvelope::get(outcome.entry_id).await.unwrap().flags;
        assert_eq!(before, after);
        assert!(SnoozeEntry::active_for_email(outcome.entry_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn a_new_snooze_supersedes_the_active_one() {
        let account_id = id!(64);
        let outcome = EmailEnvelope::upsert(test_envelope(account_id, "INBOX", 702))
            .await
            .unwrap();

        snooze(
            account_id,
            outcome.entry_id,
            utc_now!() + 3_600_000,
            SnoozePreset::Tomorrow,
        )
        .await
        .unwrap();
        let second = snooze(
            account_id,
            outcome.entry_id,
            utc_now!() + 7_200_000,
            SnoozePreset::NextWeek,
        )
        .await
        .unwrap();

        let active = SnoozeEntry::active_for_email(outcome.entry_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, second.id);
        let all = SnoozeEntry::list_for_email(outcome.entry_id).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.iter().filter(|s| !s.processed).count(), 1);
    }
}
