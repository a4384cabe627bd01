//! 可编辑条目
//!
//! 通用编辑/删除弹窗支持五种条目：个人资料、商品、商家、职位、活动。
//! 每种条目携带自己的字段结构，按类型穷尽匹配分发，不做字符串比较。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ItemError {
    #[error("{kind} 缺少必填字段: {field}")]
    MissingField { kind: &'static str, field: &'static str },
    #[error("{kind} 字段格式无效: {field}")]
    InvalidField { kind: &'static str, field: &'static str },
}

// ============================================================================
// 条目类型与字段结构
// ============================================================================

/// 条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Profile,
    Listing,
    Business,
    Job,
    Event,
}

/// 字段类型（决定编辑控件）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    LongText,
    Price,
    Url,
    DateTime,
}

/// 字段描述
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

const fn field(name: &'static str, kind: FieldKind, required: bool) -> FieldSpec {
    FieldSpec { name, kind, required }
}

const PROFILE_FIELDS: &[FieldSpec] = &[
    field("full_name", FieldKind::Text, true),
    field("headline", FieldKind::Text, false),
    field("bio", FieldKind::LongText, false),
    field("location", FieldKind::Text, false),
    field("website", FieldKind::Url, false),
];

const LISTING_FIELDS: &[FieldSpec] = &[
    field("title", FieldKind::Text, true),
    field("description", FieldKind::LongText, false),
    field("price", FieldKind::Price, true),
    field("category", FieldKind::Text, false),
];

const BUSINESS_FIELDS: &[FieldSpec] = &[
    field("name", FieldKind::Text, true),
    field("description", FieldKind::LongText, false),
    field("category", FieldKind::Text, false),
    field("website", FieldKind::Url, false),
];

const JOB_FIELDS: &[FieldSpec] = &[
    field("title", FieldKind::Text, true),
    field("company", FieldKind::Text, true),
    field("description", FieldKind::LongText, false),
    field("location", FieldKind::Text, false),
    field("apply_url", FieldKind::Url, false),
];

const EVENT_FIELDS: &[FieldSpec] = &[
    field("title", FieldKind::Text, true),
    field("description", FieldKind::LongText, false),
    field("starts_at", FieldKind::DateTime, true),
    field("location", FieldKind::Text, false),
];

impl ItemKind {
    pub const ALL: [ItemKind; 5] = [
        ItemKind::Profile,
        ItemKind::Listing,
        ItemKind::Business,
        ItemKind::Job,
        ItemKind::Event,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Profile => "profile",
            ItemKind::Listing => "listing",
            ItemKind::Business => "business",
            ItemKind::Job => "job",
            ItemKind::Event => "event",
        }
    }

    /// 后端数据表
    pub fn table(&self) -> &'static str {
        match self {
            ItemKind::Profile => "profiles",
            ItemKind::Listing => "marketplace_listings",
            ItemKind::Business => "businesses",
            ItemKind::Job => "jobs",
            ItemKind::Event => "events",
        }
    }

    /// 编辑表单字段
    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            ItemKind::Profile => PROFILE_FIELDS,
            ItemKind::Listing => LISTING_FIELDS,
            ItemKind::Business => BUSINESS_FIELDS,
            ItemKind::Job => JOB_FIELDS,
            ItemKind::Event => EVENT_FIELDS,
        }
    }
}

// ============================================================================
// 条目内容
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProfileFields {
    pub full_name: String,
    pub headline: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListingFields {
    pub title: String,
    pub description: Option<String>,
    pub price: f64,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BusinessFields {
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobFields {
    pub title: String,
    pub company: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub apply_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventFields {
    pub title: String,
    pub description: Option<String>,
    pub starts_at: String,
    pub location: Option<String>,
}

/// 可编辑条目（带 ID）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "fields", rename_all = "lowercase")]
pub enum ItemFields {
    Profile(ProfileFields),
    Listing(ListingFields),
    Business(BusinessFields),
    Job(JobFields),
    Event(EventFields),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditableItem {
    pub id: String,
    #[serde(flatten)]
    pub fields: ItemFields,
}

fn require(kind: ItemKind, name: &'static str, value: &str) -> Result<(), ItemError> {
    if value.trim().is_empty() {
        return Err(ItemError::MissingField {
            kind: kind.as_str(),
            field: name,
        });
    }
    Ok(())
}

fn check_url(kind: ItemKind, name: &'static str, value: Option<&str>) -> Result<(), ItemError> {
    match value.map(str::trim) {
        Some(url) if !url.is_empty() && !(url.starts_with("http://") || url.starts_with("https://")) => {
            Err(ItemError::InvalidField {
                kind: kind.as_str(),
                field: name,
            })
        }
        _ => Ok(()),
    }
}

impl EditableItem {
    pub fn new(id: impl Into<String>, fields: ItemFields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn kind(&self) -> ItemKind {
        match &self.fields {
            ItemFields::Profile(_) => ItemKind::Profile,
            ItemFields::Listing(_) => ItemKind::Listing,
            ItemFields::Business(_) => ItemKind::Business,
            ItemFields::Job(_) => ItemKind::Job,
            ItemFields::Event(_) => ItemKind::Event,
        }
    }

    /// 校验必填字段和格式
    pub fn validate(&self) -> Result<(), ItemError> {
        let kind = self.kind();
        match &self.fields {
            ItemFields::Profile(p) => {
                require(kind, "full_name", &p.full_name)?;
                check_url(kind, "website", p.website.as_deref())
            }
            ItemFields::Listing(l) => {
                require(kind, "title", &l.title)?;
                if !l.price.is_finite() || l.price < 0.0 {
                    return Err(ItemError::InvalidField {
                        kind: kind.as_str(),
                        field: "price",
                    });
                }
                Ok(())
            }
            ItemFields::Business(b) => {
                require(kind, "name", &b.name)?;
                check_url(kind, "website", b.website.as_deref())
            }
            ItemFields::Job(j) => {
                require(kind, "title", &j.title)?;
                require(kind, "company", &j.company)?;
                check_url(kind, "apply_url", j.apply_url.as_deref())
            }
            ItemFields::Event(e) => {
                require(kind, "title", &e.title)?;
                require(kind, "starts_at", &e.starts_at)?;
                if crate::presence::parse_timestamp(&e.starts_at).is_none() {
                    return Err(ItemError::InvalidField {
                        kind: kind.as_str(),
                        field: "starts_at",
                    });
                }
                Ok(())
            }
        }
    }

    /// 更新请求体（只含字段，不含 ID）
    pub fn update_payload(&self) -> Result<Value, serde_json::Error> {
        match &self.fields {
            ItemFields::Profile(p) => serde_json::to_value(p),
            ItemFields::Listing(l) => serde_json::to_value(l),
            ItemFields::Business(b) => serde_json::to_value(b),
            ItemFields::Job(j) => serde_json::to_value(j),
            ItemFields::Event(e) => serde_json::to_value(e),
        }
    }
}
