//! Canonical field registry for every importable entity.
//!
//! This module owns the [`EntityType`] enum (contacts, leads, clients), the
//! [`FieldType`] enum (10 supported data types) and the static
//! [`FieldDefinition`] tables every other stage of the pipeline consults.
//!
//! ## Responsibilities
//!
//! - Ordered field lists per entity (`fields_for`)
//! - Required-field and by-name lookups
//! - Header aliases used by the column mapper (never used for uniqueness)
//! - Per-field constraints: enum values, maximum length, numeric bounds
//! - Default duplicate key (`email` for contacts, `name` otherwise)
//!
//! The tables are immutable; nothing here performs I/O.

use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow};
use heck::ToTitleCase;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    #[serde(alias = "contacts")]
    Contact,
    #[serde(alias = "leads")]
    Lead,
    #[serde(alias = "clients")]
    Client,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [EntityType::Contact, EntityType::Lead, EntityType::Client];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Contact => "contact",
            EntityType::Lead => "lead",
            EntityType::Client => "client",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            EntityType::Contact => "contacts",
            EntityType::Lead => "leads",
            EntityType::Client => "clients",
        }
    }

    /// Human-facing collection name, e.g. `Contacts`; used as the template sheet name.
    pub fn display_name(&self) -> String {
        self.plural().to_title_case()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.plural())
    }
}

impl FromStr for EntityType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "contact" | "contacts" => Ok(EntityType::Contact),
            "lead" | "leads" => Ok(EntityType::Lead),
            "client" | "clients" => Ok(EntityType::Client),
            _ => Err(anyhow!(
                "Unknown entity type '{value}'. Supported types: contacts, leads, clients"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Email,
    Phone,
    Url,
    Date,
    Number,
    Currency,
    Percentage,
    Enum,
    Tags,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Email => "email",
            FieldType::Phone => "phone",
            FieldType::Url => "url",
            FieldType::Date => "date",
            FieldType::Number => "number",
            FieldType::Currency => "currency",
            FieldType::Percentage => "percentage",
            FieldType::Enum => "enum",
            FieldType::Tags => "tags",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDefinition {
    pub name: &'static str,
    pub label: &'static str,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub aliases: &'static [&'static str],
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub enum_values: &'static [&'static str],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
}

const BASE: FieldDefinition = FieldDefinition {
    name: "",
    label: "",
    field_type: FieldType::String,
    required: false,
    aliases: &[],
    enum_values: &[],
    max_length: None,
    min_value: None,
    max_value: None,
};

const NOTES_MAX_LENGTH: usize = 2000;

static CONTACT_FIELDS: &[FieldDefinition] = &[
    FieldDefinition {
        name: "first_name",
        label: "First Name",
        required: true,
        aliases: &["first", "firstname", "given name", "forename", "fname"],
        max_length: Some(100),
        ..BASE
    },
    FieldDefinition {
        name: "last_name",
        label: "Last Name",
        aliases: &["last", "lastname", "surname", "family name", "lname"],
        max_length: Some(100),
        ..BASE
    },
    FieldDefinition {
        name: "email",
        label: "Email",
        field_type: FieldType::Email,
        required: true,
        aliases: &["email address", "e-mail", "e-mail address", "mail", "email id"],
        max_length: Some(255),
        ..BASE
    },
    FieldDefinition {
        name: "phone",
        label: "Phone",
        field_type: FieldType::Phone,
        aliases: &["phone number", "telephone", "tel", "work phone", "office phone"],
        ..BASE
    },
    FieldDefinition {
        name: "mobile",
        label: "Mobile",
        field_type: FieldType::Phone,
        aliases: &["mobile phone", "mobile number", "cell", "cell phone"],
        ..BASE
    },
    FieldDefinition {
        name: "company",
        label: "Company",
        aliases: &["company name", "organization", "organisation", "employer", "account"],
        max_length: Some(200),
        ..BASE
    },
    FieldDefinition {
        name: "job_title",
        label: "Job Title",
        aliases: &["title", "position", "role", "designation"],
        max_length: Some(150),
        ..BASE
    },
    FieldDefinition {
        name: "website",
        label: "Website",
        field_type: FieldType::Url,
        aliases: &["url", "web", "homepage", "web site"],
        ..BASE
    },
    FieldDefinition {
        name: "birthday",
        label: "Birthday",
        field_type: FieldType::Date,
        aliases: &["date of birth", "dob", "birth date"],
        ..BASE
    },
    FieldDefinition {
        name: "address",
        label: "Address",
        aliases: &["street", "street address", "address line 1", "address 1"],
        max_length: Some(255),
        ..BASE
    },
    FieldDefinition {
        name: "city",
        label: "City",
        aliases: &["town"],
        max_length: Some(100),
        ..BASE
    },
    FieldDefinition {
        name: "state",
        label: "State",
        aliases: &["province", "region", "county"],
        max_length: Some(100),
        ..BASE
    },
    FieldDefinition {
        name: "postal_code",
        label: "Postal Code",
        aliases: &["zip", "zip code", "postcode", "postal"],
        max_length: Some(20),
        ..BASE
    },
    FieldDefinition {
        name: "country",
        label: "Country",
        aliases: &["nation", "country code"],
        max_length: Some(100),
        ..BASE
    },
    FieldDefinition {
        name: "status",
        label: "Status",
        field_type: FieldType::Enum,
        aliases: &["contact status"],
        enum_values: &["active", "inactive", "archived"],
        ..BASE
    },
    FieldDefinition {
        name: "tags",
        label: "Tags",
        field_type: FieldType::Tags,
        aliases: &["labels", "categories", "groups"],
        ..BASE
    },
    FieldDefinition {
        name: "notes",
        label: "Notes",
        aliases: &["note", "comments", "comment", "description"],
        max_length: Some(NOTES_MAX_LENGTH),
        ..BASE
    },
];

static LEAD_FIELDS: &[FieldDefinition] = &[
    FieldDefinition {
        name: "name",
        label: "Name",
        required: true,
        aliases: &["lead name", "full name", "contact name", "contact"],
        max_length: Some(200),
        ..BASE
    },
    FieldDefinition {
        name: "email",
        label: "Email",
        field_type: FieldType::Email,
        aliases: &["email address", "e-mail", "e-mail address", "mail"],
        max_length: Some(255),
        ..BASE
    },
    FieldDefinition {
        name: "phone",
        label: "Phone",
        field_type: FieldType::Phone,
        aliases: &["phone number", "telephone", "tel", "mobile", "cell"],
        ..BASE
    },
    FieldDefinition {
        name: "company",
        label: "Company",
        aliases: &["company name", "organization", "business", "account"],
        max_length: Some(200),
        ..BASE
    },
    FieldDefinition {
        name: "title",
        label: "Title",
        aliases: &["job title", "position", "role"],
        max_length: Some(150),
        ..BASE
    },
    FieldDefinition {
        name: "source",
        label: "Source",
        field_type: FieldType::Enum,
        aliases: &["lead source", "channel", "origin"],
        enum_values: &[
            "website",
            "referral",
            "event",
            "social",
            "advertisement",
            "cold_call",
            "other",
        ],
        ..BASE
    },
    FieldDefinition {
        name: "status",
        label: "Status",
        field_type: FieldType::Enum,
        aliases: &["lead status", "stage"],
        enum_values: &[
            "new",
            "contacted",
            "qualified",
            "proposal",
            "negotiation",
            "won",
            "lost",
        ],
        ..BASE
    },
    FieldDefinition {
        name: "estimated_value",
        label: "Estimated Value",
        field_type: FieldType::Currency,
        aliases: &["deal value", "value", "amount", "deal size", "budget"],
        ..BASE
    },
    FieldDefinition {
        name: "probability",
        label: "Probability",
        field_type: FieldType::Percentage,
        aliases: &["win probability", "likelihood", "chance"],
        ..BASE
    },
    FieldDefinition {
        name: "score",
        label: "Lead Score",
        field_type: FieldType::Number,
        aliases: &["rating", "lead rating"],
        min_value: Some(0.0),
        max_value: Some(100.0),
        ..BASE
    },
    FieldDefinition {
        name: "expected_close_date",
        label: "Expected Close Date",
        field_type: FieldType::Date,
        aliases: &["close date", "closing date", "expected close"],
        ..BASE
    },
    FieldDefinition {
        name: "website",
        label: "Website",
        field_type: FieldType::Url,
        aliases: &["url", "web", "homepage"],
        ..BASE
    },
    FieldDefinition {
        name: "tags",
        label: "Tags",
        field_type: FieldType::Tags,
        aliases: &["labels", "categories"],
        ..BASE
    },
    FieldDefinition {
        name: "notes",
        label: "Notes",
        aliases: &["note", "comments", "comment", "description"],
        max_length: Some(NOTES_MAX_LENGTH),
        ..BASE
    },
];

static CLIENT_FIELDS: &[FieldDefinition] = &[
    FieldDefinition {
        name: "name",
        label: "Client Name",
        required: true,
        aliases: &[
            "company",
            "company name",
            "client",
            "organization",
            "business name",
            "account name",
        ],
        max_length: Some(200),
        ..BASE
    },
    FieldDefinition {
        name: "email",
        label: "Email",
        field_type: FieldType::Email,
        aliases: &["email address", "e-mail", "billing email", "contact email"],
        max_length: Some(255),
        ..BASE
    },
    FieldDefinition {
        name: "phone",
        label: "Phone",
        field_type: FieldType::Phone,
        aliases: &["phone number", "telephone", "tel", "main phone"],
        ..BASE
    },
    FieldDefinition {
        name: "website",
        label: "Website",
        field_type: FieldType::Url,
        aliases: &["url", "web", "homepage", "domain"],
        ..BASE
    },
    FieldDefinition {
        name: "industry",
        label: "Industry",
        aliases: &["sector", "vertical"],
        max_length: Some(100),
        ..BASE
    },
    FieldDefinition {
        name: "employees",
        label: "Employees",
        field_type: FieldType::Number,
        aliases: &["employee count", "company size", "headcount", "staff"],
        min_value: Some(0.0),
        ..BASE
    },
    FieldDefinition {
        name: "annual_revenue",
        label: "Annual Revenue",
        field_type: FieldType::Currency,
        aliases: &["revenue", "turnover", "annual sales"],
        ..BASE
    },
    FieldDefinition {
        name: "tax_id",
        label: "Tax ID",
        aliases: &["vat", "vat number", "tax number", "ein", "tin"],
        max_length: Some(50),
        ..BASE
    },
    FieldDefinition {
        name: "address",
        label: "Address",
        aliases: &["street", "street address", "billing address", "address line 1"],
        max_length: Some(255),
        ..BASE
    },
    FieldDefinition {
        name: "city",
        label: "City",
        aliases: &["town"],
        max_length: Some(100),
        ..BASE
    },
    FieldDefinition {
        name: "postal_code",
        label: "Postal Code",
        aliases: &["zip", "zip code", "postcode"],
        max_length: Some(20),
        ..BASE
    },
    FieldDefinition {
        name: "country",
        label: "Country",
        aliases: &["nation"],
        max_length: Some(100),
        ..BASE
    },
    FieldDefinition {
        name: "status",
        label: "Status",
        field_type: FieldType::Enum,
        aliases: &["client status", "account status"],
        enum_values: &["active", "inactive", "prospect", "churned"],
        ..BASE
    },
    FieldDefinition {
        name: "client_since",
        label: "Client Since",
        field_type: FieldType::Date,
        aliases: &["customer since", "start date", "onboarded"],
        ..BASE
    },
    FieldDefinition {
        name: "tags",
        label: "Tags",
        field_type: FieldType::Tags,
        aliases: &["labels", "segments"],
        ..BASE
    },
    FieldDefinition {
        name: "notes",
        label: "Notes",
        aliases: &["note", "comments", "comment", "description"],
        max_length: Some(NOTES_MAX_LENGTH),
        ..BASE
    },
];

pub fn fields_for(entity: EntityType) -> &'static [FieldDefinition] {
    match entity {
        EntityType::Contact => CONTACT_FIELDS,
        EntityType::Lead => LEAD_FIELDS,
        EntityType::Client => CLIENT_FIELDS,
    }
}

pub fn required_fields_for(entity: EntityType) -> Vec<&'static FieldDefinition> {
    fields_for(entity).iter().filter(|f| f.required).collect()
}

pub fn field_by_name(entity: EntityType, name: &str) -> Option<&'static FieldDefinition> {
    fields_for(entity).iter().find(|f| f.name == name)
}

pub fn default_duplicate_key(entity: EntityType) -> &'static str {
    match entity {
        EntityType::Contact => "email",
        EntityType::Lead | EntityType::Client => "name",
    }
}

/// Header labels in registry order, as used by import templates.
pub fn labels_for(entity: EntityType) -> Vec<String> {
    fields_for(entity)
        .iter()
        .map(|f| f.label.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn field_names_are_unique_per_entity() {
        for entity in EntityType::ALL {
            let mut seen = HashSet::new();
            for field in fields_for(entity) {
                assert!(
                    seen.insert(field.name),
                    "duplicate field '{}' for {entity}",
                    field.name
                );
            }
        }
    }

    #[test]
    fn enum_fields_declare_values() {
        for entity in EntityType::ALL {
            for field in fields_for(entity) {
                assert_eq!(
                    field.field_type == FieldType::Enum,
                    !field.enum_values.is_empty(),
                    "{entity}.{}",
                    field.name
                );
            }
        }
    }

    #[test]
    fn default_duplicate_key_is_a_registered_field() {
        for entity in EntityType::ALL {
            let key = default_duplicate_key(entity);
            assert!(field_by_name(entity, key).is_some(), "{entity} lacks {key}");
        }
        assert_eq!(default_duplicate_key(EntityType::Contact), "email");
        assert_eq!(default_duplicate_key(EntityType::Lead), "name");
    }

    #[test]
    fn required_fields_follow_registry_order() {
        let required = required_fields_for(EntityType::Contact)
            .into_iter()
            .map(|f| f.name)
            .collect::<Vec<_>>();
        assert_eq!(required, vec!["first_name", "email"]);
        assert_eq!(required_fields_for(EntityType::Client).len(), 1);
    }

    #[test]
    fn entity_type_parses_singular_and_plural() {
        assert_eq!("Contacts".parse::<EntityType>().unwrap(), EntityType::Contact);
        assert_eq!("lead".parse::<EntityType>().unwrap(), EntityType::Lead);
        assert_eq!(" clients ".parse::<EntityType>().unwrap(), EntityType::Client);
        assert!("bookings".parse::<EntityType>().is_err());
    }

    #[test]
    fn display_name_is_title_cased_plural() {
        assert_eq!(EntityType::Contact.display_name(), "Contacts");
        assert_eq!(EntityType::Client.display_name(), "Clients");
    }

    #[test]
    fn field_by_name_returns_none_for_unknown_field() {
        assert!(field_by_name(EntityType::Lead, "birthday").is_none());
        let email = field_by_name(EntityType::Contact, "email").unwrap();
        assert_eq!(email.label, "Email");
        assert_eq!(email.field_type, FieldType::Email);
    }
}
