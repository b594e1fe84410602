use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------------------------

// 目录条目：由目录数据方提供，核心只读不写
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub download_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_download_url: Option<String>, // 备用（原始）下载地址
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_download_path: Option<String>, // 直链路径模板，配合 source.url 使用
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<EntrySource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl CatalogEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>, download_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            download_url: download_url.into(),
            ..Default::default()
        }
    }

    pub fn with_original_url(mut self, url: impl Into<String>) -> Self {
        self.original_download_url = Some(url.into());
        self
    }

    pub fn with_direct_path(mut self, source_url: impl Into<String>, path: impl Into<String>) -> Self {
        self.source = Some(EntrySource {
            url: Some(source_url.into()),
        });
        self.direct_download_path = Some(path.into());
        self
    }

    pub fn source_url(&self) -> Option<&str> {
        self.source.as_ref().and_then(|s| s.url.as_deref())
    }
}
