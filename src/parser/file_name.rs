use url::Url;

use crate::common::models::CatalogEntry;

const DEFAULT_FILE_NAME: &str = "download";

/// 推导下载文件名：显式字段 > 主地址路径最后一段 > 目录名称。
pub fn derive_file_name(entry: &CatalogEntry, primary_url: &str) -> String {
    let explicit = entry
        .file_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    let name = explicit
        .or_else(|| file_name_from_url(primary_url))
        .or_else(|| Some(entry.name.trim().to_string()).filter(|name| !name.is_empty()))
        .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());

    sanitize(&name)
}

// 取 URL 路径中最后一个非空段，并做百分号解码
pub fn file_name_from_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    let segment = url
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()?;

    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());

    Some(decoded).filter(|name| !name.trim().is_empty())
}

// 替换路径分隔符和控制字符，避免写出输出目录
pub fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => DEFAULT_FILE_NAME.to_string(),
        _ => cleaned,
    }
}
