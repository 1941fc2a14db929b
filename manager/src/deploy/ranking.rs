//! Latest-deployment election

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::models::configuration::ManagedConfiguration;
use crate::models::deployment::Deployment;

/// Something that competes for the latest slot of a device group
pub trait Ranked {
    fn device_group_id(&self) -> &str;
    fn priority(&self) -> i64;
    fn created_at(&self) -> DateTime<Utc>;
}

impl Ranked for ManagedConfiguration {
    fn device_group_id(&self) -> &str {
        ManagedConfiguration::device_group_id(self)
    }

    fn priority(&self) -> i64 {
        ManagedConfiguration::priority(self)
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_time_utc()
    }
}

impl Ranked for Deployment {
    fn device_group_id(&self) -> &str {
        &self.device_group_id
    }

    fn priority(&self) -> i64 {
        self.priority
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_date_time_utc
    }
}

/// Winner first: priority descending, then creation time descending
pub fn rank_order<T: Ranked>(a: &T, b: &T) -> Ordering {
    b.priority()
        .cmp(&a.priority())
        .then_with(|| b.created_at().cmp(&a.created_at()))
}

/// Members of a device group, winner first
pub fn ranked_group<T: Ranked>(candidates: Vec<T>, device_group_id: &str) -> Vec<T> {
    let mut group: Vec<T> = candidates
        .into_iter()
        .filter(|c| c.device_group_id() == device_group_id)
        .collect();
    group.sort_by(rank_order);
    group
}

/// The latest deployment of a device group, if it has any member
pub fn elect<T: Ranked>(candidates: Vec<T>, device_group_id: &str) -> Option<T> {
    ranked_group(candidates, device_group_id).into_iter().next()
}

/// A newcomer takes the latest slot on equal priority because it is newer
pub fn supersedes(new_priority: i64, top_priority: i64) -> bool {
    new_priority >= top_priority
}
