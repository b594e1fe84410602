use tracing::debug;
use url::Url;

use crate::common::models::CatalogEntry;

// 解析结果：主地址 + 可选的备用地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUrls {
    pub primary_url: String,
    pub fallback_url: Option<String>,
}

pub struct UrlResolver;

impl UrlResolver {
    /// 解析目录条目的下载地址，永远不会失败。
    ///
    /// 备用地址按顺序取 `originalDownloadUrl`、合成的直链，第一个非空且与主地址
    /// 不同的候选者生效。
    pub fn resolve(entry: &CatalogEntry) -> ResolvedUrls {
        let primary_url = entry.download_url.trim().to_string();

        let candidates = [
            entry
                .original_download_url
                .as_deref()
                .map(|u| u.trim().to_string()),
            Self::direct_url(entry),
        ];

        let fallback_url = candidates
            .into_iter()
            .flatten()
            .find(|candidate| Self::is_distinct(&primary_url, candidate));

        debug!(
            "解析下载地址: {} -> 主地址: {}, 备用地址: {:?}",
            entry.id, primary_url, fallback_url
        );

        ResolvedUrls {
            primary_url,
            fallback_url,
        }
    }

    /// 由来源站点和直链路径模板合成直链。
    ///
    /// 来源地址解析失败、缺少主机名或者模板为空时返回 `None`。
    pub fn direct_url(entry: &CatalogEntry) -> Option<String> {
        let template = entry.direct_download_path.as_deref()?.trim();
        if template.is_empty() {
            return None;
        }

        let source = Url::parse(entry.source_url()?.trim()).ok()?;
        let host = source.host_str()?;

        let path = template
            .replace("{category}", entry.category.as_deref().unwrap_or_default())
            .replace("{id}", &entry.id);

        let origin = match source.port() {
            Some(port) => format!("{}://{}:{}", source.scheme(), host, port),
            None => format!("{}://{}", source.scheme(), host),
        };

        if path.starts_with('/') {
            Some(format!("{}{}", origin, path))
        } else {
            Some(format!("{}/{}", origin, path))
        }
    }

    // 备用地址只有在非空且与主地址不同时才生效
    fn is_distinct(primary: &str, candidate: &str) -> bool {
        !candidate.is_empty() && candidate != primary
    }
}
