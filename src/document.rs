//! JSON:API shaped payloads accepted by the cache and the graph.
//!
//! Only the subset the relationship layer consumes is modeled. A relationship payload
//! distinguishes a missing `data` member from an explicit `"data": null`: the former means "no
//! information", the latter "known to be empty".

use serde::{
    de::Deserializer,
    ser::{SerializeSeq, Serializer},
    Deserialize, Serialize,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::{error::RelgraphError, identifier::ResourceRef};

/// The `data` member of a relationship payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipData {
    /// `"data": null`
    Null,
    One(ResourceRef),
    Many(Vec<ResourceRef>),
}

impl RelationshipData {
    pub fn refs(&self) -> Vec<&ResourceRef> {
        match self {
            RelationshipData::Null => Vec::new(),
            RelationshipData::One(r) => vec![r],
            RelationshipData::Many(refs) => refs.iter().collect(),
        }
    }
}

impl Serialize for RelationshipData {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        match self {
            RelationshipData::Null => ser.serialize_none(),
            RelationshipData::One(r) => r.serialize(ser),
            RelationshipData::Many(refs) => {
                let mut seq = ser.serialize_seq(Some(refs.len()))?;
                for r in refs {
                    seq.serialize_element(r)?;
                }
                seq.end()
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawData {
    Many(Vec<ResourceRef>),
    One(ResourceRef),
}

fn deserialize_data<'de, D: Deserializer<'de>>(
    de: D,
) -> Result<Option<RelationshipData>, D::Error> {
    Ok(Some(match Option::<RawData>::deserialize(de)? {
        None => RelationshipData::Null,
        Some(RawData::One(r)) => RelationshipData::One(r),
        Some(RawData::Many(refs)) => RelationshipData::Many(refs),
    }))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Link {
    Href(String),
    Object {
        href: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<Value>,
    },
}

impl Link {
    pub fn href(&self) -> &str {
        match self {
            Link::Href(href) => href,
            Link::Object { href, .. } => href,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Links {
    #[serde(rename = "self", default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related: Option<Link>,
}

impl Links {
    pub fn related(href: &str) -> Self {
        Links {
            self_link: None,
            related: Some(Link::Href(href.to_string())),
        }
    }

    pub fn related_href(&self) -> Option<&str> {
        self.related.as_ref().map(Link::href)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipPayload {
    #[serde(
        default,
        deserialize_with = "deserialize_data",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<RelationshipData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Links>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl RelationshipPayload {
    pub fn one(reference: Option<ResourceRef>) -> Self {
        RelationshipPayload {
            data: Some(reference.map_or(RelationshipData::Null, RelationshipData::One)),
            ..Default::default()
        }
    }

    pub fn many(references: Vec<ResourceRef>) -> Self {
        RelationshipPayload {
            data: Some(RelationshipData::Many(references)),
            ..Default::default()
        }
    }

    pub fn with_links(mut self, links: Links) -> Self {
        self.links = Some(links);
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceObject {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationships: Option<BTreeMap<String, RelationshipPayload>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ResourceObject {
    pub fn new(resource_type: &str, id: &str) -> Self {
        ResourceObject {
            resource_type: resource_type.to_string(),
            id: Some(id.to_string()),
            ..Default::default()
        }
    }

    pub fn attribute(mut self, key: &str, value: Value) -> Self {
        self.attributes
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value);
        self
    }

    pub fn relationship(mut self, key: &str, payload: RelationshipPayload) -> Self {
        self.relationships
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), payload);
        self
    }

    pub fn as_ref_payload(&self) -> ResourceRef {
        ResourceRef {
            resource_type: self.resource_type.clone(),
            id: self.id.clone(),
            lid: self.lid.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryData {
    Many(Vec<ResourceObject>),
    One(ResourceObject),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<PrimaryData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included: Vec<ResourceObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ApiError>,
}

impl ResourceDocument {
    pub fn from_json(content: &str) -> Result<Self, RelgraphError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Primary data followed by included resources.
    pub fn resources(&self) -> Vec<&ResourceObject> {
        let mut resources: Vec<&ResourceObject> = match &self.data {
            None => Vec::new(),
            Some(PrimaryData::One(resource)) => vec![resource],
            Some(PrimaryData::Many(resources)) => resources.iter().collect(),
        };
        resources.extend(self.included.iter());
        resources
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ErrorSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ApiError {
    /// A validation error pointing at `/data/attributes/{attribute}`.
    pub fn invalid_attribute(attribute: &str, detail: &str) -> Self {
        ApiError {
            status: Some("422".to_string()),
            title: Some("Invalid Attribute".to_string()),
            detail: Some(detail.to_string()),
            source: Some(ErrorSource {
                pointer: Some(format!("/data/attributes/{attribute}")),
                parameter: None,
            }),
            ..Default::default()
        }
    }
}
