//! Typed query filters.
//!
//! A filter is either a `(field, operator, value)` clause or an "any of"
//! group. Clause values accept proxies and raw JSON alike through
//! [`FieldValue`]; serialization to the client's wire form converts only the
//! value slot, never the field path or operator.

use serde_json::Value;

use crate::convert::{FieldValue, to_raw};

/// One node of a filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// A `[field_path, operator, value]` clause.
    Clause {
        field: String,
        op: String,
        value: FieldValue,
    },
    /// A group matching when any of its inner filters matches.
    Any(Vec<Filter>),
}

impl Filter {
    /// A comparison clause. The value can be a scalar, a raw JSON value, a
    /// record reference or a proxy object.
    pub fn clause(
        field: impl Into<String>,
        op: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> Self {
        Self::Clause {
            field: field.into(),
            op: op.into(),
            value: value.into(),
        }
    }

    /// An "any of these" group.
    pub fn any(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::Any(filters.into_iter().collect())
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Clause { field, op, value } => {
                Value::Array(vec![field.clone().into(), op.clone().into(), to_raw(value)])
            }
            Self::Any(filters) => serde_json::json!({
                "filter_operator": "any",
                "filters": filters.iter().map(Filter::to_value).collect::<Vec<_>>(),
            }),
        }
    }
}

/// Serialize filters to the raw JSON array the client consumes. Only clause
/// values are converted; operators and field paths are untouched.
pub fn filters_to_raw(filters: &[Filter]) -> Value {
    Value::Array(filters.iter().map(Filter::to_value).collect())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::Entity;
    use crate::test_support::memory_session;

    use super::*;

    #[test]
    fn scalar_clauses_serialize_unchanged() {
        let raw = filters_to_raw(&[
            Filter::clause("code", "is", "sh0010"),
            Filter::clause("sg_cut_in", "greater_than", 1001),
            Filter::clause("is_template", "is", false),
        ]);
        assert_eq!(
            raw,
            json!([
                ["code", "is", "sh0010"],
                ["sg_cut_in", "greater_than", 1001],
                ["is_template", "is", false],
            ])
        );
    }

    #[test]
    fn proxy_values_collapse_to_record_refs() {
        let session = memory_session();
        let user = Entity::new(session, "HumanUser", 42);
        let raw = filters_to_raw(&[Filter::clause("user", "is", user)]);
        assert_eq!(raw, json!([["user", "is", {"type": "HumanUser", "id": 42}]]));
    }

    #[test]
    fn already_raw_dict_values_pass_through() {
        let raw = filters_to_raw(&[Filter::clause(
            "project",
            "is",
            json!({"type": "Project", "id": 1}),
        )]);
        assert_eq!(
            raw,
            json!([["project", "is", {"type": "Project", "id": 1}]])
        );
    }

    #[test]
    fn list_values_convert_each_element() {
        let session = memory_session();
        let a = Entity::new(session.clone(), "Shot", 1);
        let b = Entity::new(session, "Shot", 2);
        let raw = filters_to_raw(&[Filter::clause(
            "entity",
            "in",
            vec![FieldValue::from(a), FieldValue::from(b)],
        )]);
        assert_eq!(
            raw,
            json!([["entity", "in", [
                {"type": "Shot", "id": 1},
                {"type": "Shot", "id": 2},
            ]]])
        );
    }

    #[test]
    fn any_groups_nest() {
        let raw = filters_to_raw(&[Filter::any([
            Filter::clause("step.Step.code", "is", "Comp"),
            Filter::clause("step.Step.short_name", "is", "Comp"),
        ])]);
        assert_eq!(
            raw,
            json!([{
                "filter_operator": "any",
                "filters": [
                    ["step.Step.code", "is", "Comp"],
                    ["step.Step.short_name", "is", "Comp"],
                ],
            }])
        );
    }
}
