//! Transcript text builders.
//!
//! Formats the fixed framing around job output (header, section titles,
//! trailer, stop marker) and cleans captured text for display.

use crate::model::{Language, RunConfig};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use time::OffsetDateTime;

fn ansi_csi() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1B\[[0-9;]*[a-zA-Z]").expect("static regex"))
}

/// Remove ANSI CSI sequences (`ESC [ ... letter`) from captured text.
pub fn strip_ansi(text: &str) -> String {
    ansi_csi().replace_all(text, "").into_owned()
}

/// Terminal column width, counting CJK and fullwidth forms as two columns.
pub fn display_width(text: &str) -> usize {
    text.chars()
        .map(|c| match c as u32 {
            0x1100..=0x115F
            | 0x2E80..=0xA4CF
            | 0xAC00..=0xD7A3
            | 0xF900..=0xFAFF
            | 0xFE30..=0xFE4F
            | 0xFF00..=0xFF60
            | 0xFFE0..=0xFFE6 => 2,
            _ => 1,
        })
        .sum()
}

/// A title centred in a line of `-` of the given width, newline-terminated.
/// An empty title yields a plain separator.
pub fn centered_title(title: &str, width: usize) -> String {
    let title_width = display_width(title);
    if title_width >= width {
        return format!("{title}\n");
    }
    let pad = width - title_width;
    let left = pad / 2;
    format!("{}{}{}\n", "-".repeat(left), title, "-".repeat(pad - left))
}

fn format_clock(at: OffsetDateTime) -> String {
    let fmt = time::macros::format_description!(
        "[weekday repr:short] [month repr:short] [day padding:none] [hour]:[minute]:[second] [offset_hour sign:mandatory]:[offset_minute] [year]"
    );
    at.format(fmt).unwrap_or_else(|_| "now".into())
}

fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Banner printed before the first job.
pub fn header(cfg: &RunConfig) -> String {
    let lang = cfg.language;
    let mut out = centered_title(
        lang.pick(" 融合怪测试 ", " Fusion Benchmark Suite "),
        cfg.width,
    );
    out.push_str(&format!(
        "{}{}\n",
        lang.pick("版本          : ", "Version               : "),
        env!("CARGO_PKG_VERSION")
    ));
    out.push_str(&format!(
        "{}{}\n",
        lang.pick("运行编号      : ", "Run ID                : "),
        cfg.run_id
    ));
    out.push_str(&format!(
        "{}{}\n",
        lang.pick("开始时间      : ", "Start Time            : "),
        format_clock(now_local())
    ));
    out
}

/// Elapsed-time footer emitted after a run that was not stopped.
pub fn trailer(lang: Language, width: usize, elapsed: Duration) -> String {
    trailer_at(lang, width, elapsed, now_local())
}

fn trailer_at(lang: Language, width: usize, elapsed: Duration, at: OffsetDateTime) -> String {
    let secs = elapsed.as_secs();
    let (minutes, seconds) = (secs / 60, secs % 60);
    let mut out = centered_title("", width);
    match lang {
        Language::Zh => {
            out.push_str(&format!("花费          : {minutes} 分 {seconds} 秒\n"));
            out.push_str(&format!("时间          : {}\n", format_clock(at)));
        }
        Language::En => {
            out.push_str(&format!(
                "Cost    Time          : {minutes} min {seconds} sec\n"
            ));
            out.push_str(&format!("Current Time          : {}\n", format_clock(at)));
        }
    }
    out.push_str(&centered_title("", width));
    out
}

/// Marker appended when the user stops a run.
pub fn stop_marker(lang: Language) -> String {
    format!(
        "\n\n========== {} ==========\n",
        lang.pick("测试被用户中断", "Test interrupted by user")
    )
}
