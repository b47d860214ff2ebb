//! Receive checksum classification.

use crate::descriptor::RxWriteback;
use crate::types::{ChecksumStatus, RxChecksum};

fn status(checked: bool, error: bool) -> ChecksumStatus {
    match (checked, error) {
        (false, _) => ChecksumStatus::NotChecked,
        (true, false) => ChecksumStatus::Good,
        (true, true) => ChecksumStatus::Bad,
    }
}

/// Map write-back status and error bits to per-layer results.
pub fn classify(wb: &RxWriteback) -> RxChecksum {
    RxChecksum {
        ip: status(wb.ip_checked, wb.ip_error),
        l4: status(wb.l4_checked, wb.l4_error),
    }
}
