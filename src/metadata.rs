//! Service metadata (EDMX) model.
//!
//! Only what the simulator needs is read: entity types with their key and
//! property declarations, and entity sets with their entity type. The
//! document is scanned with regular expressions, the same way the sanity
//! check looks for every `EntityType` element regardless of schema.
//! Comments and CDATA sections are removed before scanning.

use crate::error::{MockServerError, Result};
use regex::Regex;
use std::collections::HashSet;
use tracing::error;

/// A property of an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    /// EDM type, e.g. `Edm.String`
    pub edm_type: String,
}

/// An `EntityType` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityType {
    pub name: String,
    pub keys: Vec<String>,
    pub properties: Vec<Property>,
}

/// An `EntitySet` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySetDecl {
    pub name: String,
    /// Entity type name without namespace
    pub entity_type: String,
}

/// Parsed metadata document.
#[derive(Debug, Clone)]
pub struct Metadata {
    raw: String,
    entity_types: Vec<EntityType>,
    entity_sets: Vec<EntitySetDecl>,
}

fn attribute(attrs: &str, name: &str) -> Option<String> {
    let pattern = format!(
        r#"\s{}\s*=\s*(?:"([^"]*)"|'([^']*)')"#,
        regex::escape(name)
    );
    let caps = Regex::new(&pattern).ok()?.captures(attrs)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}

/// The document without comments and CDATA sections.
fn markup_only(raw: &str) -> String {
    let ignored = Regex::new(r"(?s)<!--.*?-->|<!\[CDATA\[.*?\]\]>").unwrap();
    ignored.replace_all(raw, "").into_owned()
}

fn unqualified(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

impl Metadata {
    /// Parse a metadata document.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let markup = markup_only(&raw);
        let entity_type_re =
            Regex::new(r"(?s)<EntityType\b([^>]*?)(?:/>|>(.*?)</EntityType>)").unwrap();
        let property_ref_re = Regex::new(r"<PropertyRef\b([^>]*)>").unwrap();
        let property_re = Regex::new(r"<Property\b([^>]*)>").unwrap();
        let entity_set_re = Regex::new(r"<EntitySet\b([^>]*)>").unwrap();

        let entity_types: Vec<EntityType> = entity_type_re
            .captures_iter(&markup)
            .filter_map(|caps| {
                let name = attribute(&caps[1], "Name")?;
                let body = caps.get(2).map(|m| m.as_str()).unwrap_or("");
                let keys = property_ref_re
                    .captures_iter(body)
                    .filter_map(|c| attribute(&c[1], "Name"))
                    .collect();
                let properties = property_re
                    .captures_iter(body)
                    .filter_map(|c| {
                        Some(Property {
                            name: attribute(&c[1], "Name")?,
                            edm_type: attribute(&c[1], "Type")
                                .unwrap_or_else(|| "Edm.String".to_string()),
                        })
                    })
                    .collect();
                Some(EntityType {
                    name,
                    keys,
                    properties,
                })
            })
            .collect();

        if entity_types.is_empty() {
            return Err(MockServerError::MetadataInvalid(
                "no EntityType declared".to_string(),
            ));
        }

        let entity_sets = entity_set_re
            .captures_iter(&markup)
            .filter_map(|caps| {
                let name = attribute(&caps[1], "Name")?;
                let entity_type = attribute(&caps[1], "EntityType")?;
                Some(EntitySetDecl {
                    name,
                    entity_type: unqualified(&entity_type).to_string(),
                })
            })
            .collect();

        Ok(Self {
            raw,
            entity_types,
            entity_sets,
        })
    }

    /// The document as read.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn entity_types(&self) -> &[EntityType] {
        &self.entity_types
    }

    pub fn entity_sets(&self) -> &[EntitySetDecl] {
        &self.entity_sets
    }

    /// First entity type declared with `name`.
    pub fn entity_type(&self, name: &str) -> Option<&EntityType> {
        self.entity_types.iter().find(|t| t.name == name)
    }

    /// Entity type behind an entity set.
    pub fn entity_type_of_set(&self, set_name: &str) -> Option<&EntityType> {
        let decl = self.entity_sets.iter().find(|s| s.name == set_name)?;
        self.entity_type(&decl.entity_type)
    }

    /// Entity type names declared more than once, in document order.
    pub fn duplicate_entity_types(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.entity_types
            .iter()
            .filter(|t| !seen.insert(t.name.as_str()))
            .map(|t| t.name.as_str())
            .collect()
    }

    /// Log every problem found in the document. Never fails.
    pub fn sanity_check(&self) -> usize {
        let duplicates = self.duplicate_entity_types();
        for name in &duplicates {
            error!(entity = %name, "[sanity_check] Duplicate entity in metadata");
        }
        duplicates.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const ALERT_METADATA: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<edmx:Edmx Version="1.0" xmlns:edmx="http://schemas.microsoft.com/ado/2007/06/edmx">
  <edmx:DataServices m:DataServiceVersion="2.0">
    <Schema Namespace="ZALERT_SRV" xmlns="http://schemas.microsoft.com/ado/2008/09/edm">
      <EntityType Name="Alert">
        <Key>
          <PropertyRef Name="Alertguid"/>
        </Key>
        <Property Name="Alertguid" Type="Edm.String" Nullable="false"/>
        <Property Name="Title" Type="Edm.String"/>
        <Property Name="ValidUntil" Type="Edm.DateTime"/>
        <Property Name="Priority" Type="Edm.Int32"/>
        <NavigationProperty Name="ToItems" Relationship="x" FromRole="a" ToRole="b"/>
      </EntityType>
      <EntityType Name="Item">
        <Key>
          <PropertyRef Name="Order"/>
          <PropertyRef Name="Line"/>
        </Key>
        <Property Name="Order" Type="Edm.String"/>
        <Property Name="Line" Type="Edm.Int32"/>
      </EntityType>
      <EntityContainer Name="ZALERT_SRV_Entities" m:IsDefaultEntityContainer="true">
        <EntitySet Name="AlertSet" EntityType="ZALERT_SRV.Alert"/>
        <EntitySet Name="ItemSet" EntityType="ZALERT_SRV.Item"/>
      </EntityContainer>
    </Schema>
  </edmx:DataServices>
</edmx:Edmx>"#;

    #[test]
    fn test_parse_entity_types() {
        let metadata = Metadata::parse(ALERT_METADATA).unwrap();
        assert_eq!(metadata.entity_types().len(), 2);

        let alert = metadata.entity_type("Alert").unwrap();
        assert_eq!(alert.keys, ["Alertguid"]);
        let names: Vec<_> = alert.properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["Alertguid", "Title", "ValidUntil", "Priority"]);
        assert_eq!(alert.properties[2].edm_type, "Edm.DateTime");

        let item = metadata.entity_type("Item").unwrap();
        assert_eq!(item.keys, ["Order", "Line"]);
    }

    #[test]
    fn test_parse_entity_sets() {
        let metadata = Metadata::parse(ALERT_METADATA).unwrap();
        assert_eq!(
            metadata.entity_sets()[0],
            EntitySetDecl {
                name: "AlertSet".to_string(),
                entity_type: "Alert".to_string(),
            }
        );
        assert_eq!(metadata.entity_type_of_set("ItemSet").unwrap().name, "Item");
        assert!(metadata.entity_type_of_set("Missing").is_none());
    }

    #[test]
    fn test_duplicate_entity_types() {
        let doubled = ALERT_METADATA.replace(
            "<EntityType Name=\"Item\">",
            "<EntityType Name=\"Alert\"/>\n<EntityType Name=\"Item\">",
        );
        let metadata = Metadata::parse(doubled).unwrap();
        assert_eq!(metadata.duplicate_entity_types(), ["Alert"]);
        assert_eq!(metadata.sanity_check(), 1);
        // The first declaration wins
        assert_eq!(metadata.entity_type("Alert").unwrap().keys, ["Alertguid"]);
    }

    #[test]
    fn test_single_quoted_attributes() {
        let metadata = Metadata::parse(ALERT_METADATA.replace('"', "'")).unwrap();
        assert_eq!(metadata.entity_types().len(), 2);
        assert_eq!(metadata.entity_type("Item").unwrap().keys, ["Order", "Line"]);
        assert_eq!(metadata.entity_type_of_set("AlertSet").unwrap().name, "Alert");
    }

    #[test]
    fn test_comments_and_cdata_ignored() {
        let annotated = ALERT_METADATA.replace(
            "<EntityContainer",
            "<!-- <EntityType Name=\"Alert\"/> -->\n\
             <Documentation><![CDATA[<EntityType Name=\"Item\"/>]]></Documentation>\n\
             <EntityContainer",
        );
        let metadata = Metadata::parse(annotated).unwrap();
        assert_eq!(metadata.entity_types().len(), 2);
        assert!(metadata.duplicate_entity_types().is_empty());
        assert!(metadata.raw().contains("<!-- <EntityType"));
    }

    #[test]
    fn test_no_entity_types() {
        let err = Metadata::parse("<edmx:Edmx/>").unwrap_err();
        assert!(matches!(err, MockServerError::MetadataInvalid(_)));
    }
}
