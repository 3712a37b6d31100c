/// Bin id used when neither the payload nor the configuration names one.
pub const FALLBACK_BIN_ID: &str = "Bin-Master";

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Pick the bin a reading is attributed to. Never returns an empty string.
///
/// A supplied id is used verbatim, without trimming or case folding.
pub fn resolve(bin_id: Option<&str>, configured_default: Option<&str>) -> String {
    non_blank(bin_id)
        .or_else(|| non_blank(configured_default))
        .unwrap_or(FALLBACK_BIN_ID)
        .to_string()
}
