//! Terminal output helpers.

use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{ContentArrangement, Table};
use sshfs_volume::VolumeInfo;

pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Short state label for listings.
pub fn state_label(volume: &VolumeInfo) -> &'static str {
    if volume.needs_cleanup {
        "needs cleanup"
    } else if volume.references > 0 {
        "mounted"
    } else {
        "idle"
    }
}
