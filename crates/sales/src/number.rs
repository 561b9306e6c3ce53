use chrono::{DateTime, Utc};
use uuid::Uuid;

/// `SO-<YYYYMMDD>-<6 uppercase hex>`, dated by the commit time.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix = Uuid::now_v7().simple().to_string();
    // v7 leads with the timestamp; the random tail is what keeps same-day numbers apart.
    let tail = &suffix[suffix.len() - 6..];
    format!("SO-{}-{}", now.format("%Y%m%d"), tail.to_uppercase())
}
