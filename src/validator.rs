//! Structural validation of raw documents against the JSON:API top-level shape.
//!
//! This runs on the raw JSON before any model is built, and reports every
//! violation with its JSON Pointer instead of stopping at the first.

use serde_json::{json, Value};

use crate::error::{DocumentError, ShapeError, ValidateError};

/// The bundled structural schema for JSON:API 1.0 documents.
pub fn document_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "anyOf": [
            { "required": ["data"] },
            { "required": ["errors"] },
            { "required": ["meta"] }
        ],
        "properties": {
            "data": {
                "oneOf": [
                    { "type": "null" },
                    { "$ref": "#/$defs/resource" },
                    { "type": "array", "items": { "$ref": "#/$defs/resource" } }
                ]
            },
            "errors": { "type": "array", "items": { "$ref": "#/$defs/error" } },
            "included": { "type": "array", "items": { "$ref": "#/$defs/resource" } },
            "links": { "$ref": "#/$defs/links" },
            "meta": { "type": "object" },
            "jsonapi": {
                "type": "object",
                "properties": { "version": { "type": "string" } }
            }
        },
        "additionalProperties": false,
        "$defs": {
            "resource": {
                "type": "object",
                "required": ["type"],
                "properties": {
                    "type": { "type": "string" },
                    "id": { "type": ["string", "null"] },
                    "attributes": { "type": "object" },
                    "relationships": {
                        "type": "object",
                        "additionalProperties": { "$ref": "#/$defs/relationship" }
                    }
                },
                "additionalProperties": false
            },
            "relationship": {
                "type": "object",
                "properties": {
                    "data": {
                        "oneOf": [
                            { "type": "null" },
                            { "$ref": "#/$defs/identifier" },
                            { "type": "array", "items": { "$ref": "#/$defs/identifier" } }
                        ]
                    },
                    "links": { "$ref": "#/$defs/links" },
                    "meta": { "type": "object" }
                },
                "additionalProperties": false
            },
            "identifier": {
                "type": "object",
                "required": ["type", "id"],
                "properties": {
                    "type": { "type": "string" },
                    "id": { "type": "string" }
                }
            },
            "error": {
                "type": "object",
                "required": ["status", "title"],
                "properties": {
                    "status": {
                        "oneOf": [
                            { "type": "integer", "minimum": 100, "maximum": 599 },
                            { "type": "string", "pattern": "^[1-5][0-9]{2}$" }
                        ]
                    },
                    "title": { "type": "string", "minLength": 1 },
                    "detail": { "type": "string" },
                    "code": { "type": "string" },
                    "source": { "type": "object" },
                    "links": { "$ref": "#/$defs/links" },
                    "meta": { "type": "object" }
                },
                "additionalProperties": false
            },
            "links": {
                "type": "object",
                "additionalProperties": {
                    "oneOf": [
                        { "type": "null" },
                        { "type": "string" },
                        {
                            "type": "object",
                            "required": ["href"],
                            "properties": {
                                "href": { "type": "string" },
                                "meta": { "type": "object" }
                            },
                            "additionalProperties": false
                        }
                    ]
                }
            }
        }
    })
}

/// Validate a raw document against the bundled structural schema.
///
/// # Errors
///
/// Returns `ValidateError::Invalid` carrying every violation found.
pub fn validate_document_shape(document: &Value) -> Result<(), ValidateError> {
    validate_against_schema(&document_schema(), document)
}

/// Validate a raw value against an arbitrary JSON Schema.
pub fn validate_against_schema(schema: &Value, document: &Value) -> Result<(), ValidateError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| {
        ValidateError::Document(DocumentError::InvalidSection {
            section: "schema",
            expected: "a valid JSON Schema",
            actual: e.to_string(),
        })
    })?;

    let errors: Vec<ShapeError> = validator
        .iter_errors(document)
        .map(|e| ShapeError {
            path: e.instance_path.to_string(),
            message: e.to_string(),
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidateError::Invalid { errors })
    }
}
