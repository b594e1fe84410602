//! 字节数、速度与剩余时间的展示格式化。
//!
//! 所有函数都是纯函数：不持有状态、不做 I/O，遇到非法输入（负数、NaN、
//! 无穷大）时返回哨兵值而不是报错。

/// 剩余时间无法估算时返回的哨兵值
pub const ETA_CALCULATING: &str = "calculating";

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
const BASE: f64 = 1024.0;

pub struct MetricsFormatter;

impl MetricsFormatter {
    // 格式化文件大小，1024 进制，保留一位小数
    pub fn format_size(bytes: f64) -> String {
        if !bytes.is_finite() || bytes <= 0.0 {
            return "0 B".to_string();
        }

        let mut value = bytes;
        let mut unit = 0;
        while value >= BASE && unit < UNITS.len() - 1 {
            value /= BASE;
            unit += 1;
        }

        // 保留一位小数后会进位到 1024.0 的值，换到下一个单位
        if unit > 0 && unit < UNITS.len() - 1 && (value * 10.0).round() / 10.0 >= BASE {
            value /= BASE;
            unit += 1;
        }

        if unit == 0 {
            // 字节没有小数部分
            format!("{} B", value.floor() as u64)
        } else {
            format!("{:.1} {}", value, UNITS[unit])
        }
    }

    // 格式化下载速度
    pub fn format_speed(bytes_per_second: f64) -> String {
        format!("{}/s", Self::format_size(bytes_per_second))
    }

    /// 下载百分比，总大小未知时为 0，结果总在 `[0, 100]` 之内。
    pub fn percentage(downloaded: u64, total: u64) -> f64 {
        if total == 0 {
            return 0.0;
        }
        (downloaded as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }

    /// 预计剩余时间。
    ///
    /// 总大小未知、速度为 0 或者已经下载完毕时返回 [`ETA_CALCULATING`]。
    pub fn eta(total: u64, downloaded: u64, speed: f64) -> String {
        if total == 0 || downloaded >= total || !speed.is_finite() || speed <= 0.0 {
            return ETA_CALCULATING.to_string();
        }

        let remaining = (total - downloaded) as f64;
        let seconds = (remaining / speed).ceil() as u64;

        if seconds < 60 {
            format!("{}s", seconds)
        } else if seconds < 3600 {
            format!("{}m {}s", seconds / 60, seconds % 60)
        } else {
            format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
        }
    }
}
