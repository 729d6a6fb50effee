// Copyright 2025 The Brainy Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The two primitive entities of the knowledge graph: nouns (typed vertices
//! carrying a dense embedding) and verbs (typed directed edges).

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Arbitrary JSON metadata attached to nouns, verbs, commits, and refs.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Milliseconds since the Unix epoch, UTC.
#[derive(
    Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash, Default,
)]
#[serde(transparent)]
pub struct MillisSinceEpoch(pub i64);

impl MillisSinceEpoch {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }
}

/// Closed set of vertex types. Each type owns its own HNSW subindex and its
/// own shard directories under `entities/nouns/<type>/`.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NounType {
    Person,
    Document,
    Concept,
    Event,
    Organization,
    Location,
    Product,
    Project,
    Task,
    Message,
    Thing,
    Media,
    File,
    Collection,
}

impl NounType {
    pub const ALL: [Self; 14] = [
        Self::Person,
        Self::Document,
        Self::Concept,
        Self::Event,
        Self::Organization,
        Self::Location,
        Self::Product,
        Self::Project,
        Self::Task,
        Self::Message,
        Self::Thing,
        Self::Media,
        Self::File,
        Self::Collection,
    ];

    /// The lowercase tag used in storage paths and serialized documents.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Document => "document",
            Self::Concept => "concept",
            Self::Event => "event",
            Self::Organization => "organization",
            Self::Location => "location",
            Self::Product => "product",
            Self::Project => "project",
            Self::Task => "task",
            Self::Message => "message",
            Self::Thing => "thing",
            Self::Media => "media",
            Self::File => "file",
            Self::Collection => "collection",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for NounType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Closed set of edge types.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum VerbType {
    Contains,
    RelatedTo,
    FriendOf,
    WorksWith,
    CreatedBy,
    LocatedAt,
    PartOf,
    MemberOf,
    ReportsTo,
    ChildOf,
}

impl VerbType {
    pub const ALL: [Self; 10] = [
        Self::Contains,
        Self::RelatedTo,
        Self::FriendOf,
        Self::WorksWith,
        Self::CreatedBy,
        Self::LocatedAt,
        Self::PartOf,
        Self::MemberOf,
        Self::ReportsTo,
        Self::ChildOf,
    ];

    /// The camelCase tag used in storage paths and serialized documents.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::RelatedTo => "relatedTo",
            Self::FriendOf => "friendOf",
            Self::WorksWith => "worksWith",
            Self::CreatedBy => "createdBy",
            Self::LocatedAt => "locatedAt",
            Self::PartOf => "partOf",
            Self::MemberOf => "memberOf",
            Self::ReportsTo => "reportsTo",
            Self::ChildOf => "childOf",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for VerbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Opaque payload attached to a noun: either text or raw bytes.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(untagged)]
pub enum EntityData {
    Text(String),
    Bytes(Vec<u8>),
}

/// A typed vertex with a dense embedding and arbitrary metadata.
///
/// The serialized form (camelCase keys, vector included) is the canonical
/// content used for commit-tree blobs and version snapshots. Live adapter
/// storage splits the vector into its own document so vectors can be fetched
/// in bulk without paying metadata I/O; see [`NounMetadataDoc`] and
/// [`VectorDoc`].
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Noun {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub noun_type: NounType,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EntityData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    pub created_at: MillisSinceEpoch,
    pub updated_at: MillisSinceEpoch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

/// A typed directed edge between two nouns.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Verb {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub verb_type: VerbType,
    pub from: Uuid,
    pub to: Uuid,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    pub created_at: MillisSinceEpoch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

/// Version tag carried by every persisted top-level JSON document. Loading a
/// document whose tag is higher than the build's supported version fails with
/// `IncompatibleFormat`.
pub const FORMAT_VERSION: u32 = 1;

/// Adapter document for a noun, without the vector.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NounMetadataDoc {
    pub version: u32,
    pub id: Uuid,
    #[serde(rename = "type")]
    pub noun_type: NounType,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EntityData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    pub created_at: MillisSinceEpoch,
    pub updated_at: MillisSinceEpoch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

/// Adapter document for a noun's embedding.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VectorDoc {
    pub version: u32,
    pub id: Uuid,
    pub vector: Vec<f32>,
}

/// Flat adapter document for a verb, stored under `relations/<shard>/`.
/// This is the canonical verb record: commit trees and the adjacency rebuild
/// read it without knowing verb types up front.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RelationDoc {
    pub version: u32,
    pub id: Uuid,
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub verb: VerbType,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    pub created_at: MillisSinceEpoch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl Noun {
    pub fn metadata_doc(&self) -> NounMetadataDoc {
        NounMetadataDoc {
            version: FORMAT_VERSION,
            id: self.id,
            noun_type: self.noun_type,
            metadata: self.metadata.clone(),
            data: self.data.clone(),
            confidence: self.confidence,
            weight: self.weight,
            created_at: self.created_at,
            updated_at: self.updated_at,
            created_by: self.created_by.clone(),
        }
    }

    pub fn vector_doc(&self) -> VectorDoc {
        VectorDoc {
            version: FORMAT_VERSION,
            id: self.id,
            vector: self.vector.clone(),
        }
    }

    pub fn from_docs(metadata: NounMetadataDoc, vector: VectorDoc) -> Self {
        Self {
            id: metadata.id,
            noun_type: metadata.noun_type,
            vector: vector.vector,
            metadata: metadata.metadata,
            data: metadata.data,
            confidence: metadata.confidence,
            weight: metadata.weight,
            created_at: metadata.created_at,
            updated_at: metadata.updated_at,
            created_by: metadata.created_by,
        }
    }
}

impl Verb {
    pub fn relation_doc(&self) -> RelationDoc {
        RelationDoc {
            version: FORMAT_VERSION,
            id: self.id,
            source_id: self.from,
            target_id: self.to,
            verb: self.verb_type,
            metadata: self.metadata.clone(),
            weight: self.weight,
            created_at: self.created_at,
            created_by: self.created_by.clone(),
        }
    }

    pub fn from_relation_doc(doc: RelationDoc) -> Self {
        Self {
            id: doc.id,
            verb_type: doc.verb,
            from: doc.source_id,
            to: doc.target_id,
            metadata: doc.metadata,
            weight: doc.weight,
            created_at: doc.created_at,
            created_by: doc.created_by,
        }
    }
}

/// The two-hex-character shard bucket for an entity id.
pub fn uuid_shard(id: &Uuid) -> String {
    id.simple().to_string()[..2].to_ascii_lowercase()
}
