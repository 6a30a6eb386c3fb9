//! Values that are either literal strings or unresolved template expressions.
//!
//! Task specifications built at run time contain only literals. The same
//! builder also runs at deployment time over an infrastructure template, where
//! inputs may be intrinsic functions (`Ref`, `Fn::GetAtt`, `Fn::Sub`, ...) that
//! are only resolved by the template engine.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value, json};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "Value")]
pub enum Expr {
    Literal(String),
    Template(Value),
}

impl Expr {
    pub fn literal(value: impl Into<String>) -> Self {
        Expr::Literal(value.into())
    }

    /// `{"Ref": name}`
    pub fn reference(name: &str) -> Self {
        Expr::Template(json!({ "Ref": name }))
    }

    /// `{"Fn::GetAtt": [logical_name, attribute]}`
    pub fn get_att(logical_name: &str, attribute: &str) -> Self {
        Expr::Template(json!({ "Fn::GetAtt": [logical_name, attribute] }))
    }

    /// `{"Fn::Select": [index, list]}`
    pub fn select(index: usize, list: Expr) -> Self {
        Expr::Template(json!({ "Fn::Select": [index, list] }))
    }

    /// `{"Fn::Split": [delimiter, source]}`, as an [`Expr`] usable by [`Expr::select`].
    pub fn split(delimiter: &str, source: Expr) -> Self {
        Expr::Template(json!({ "Fn::Split": [delimiter, source] }))
    }

    /// Substitute `${Name}` placeholders.
    ///
    /// Resolved eagerly into a literal when every variable is a literal and no
    /// placeholder remains (pseudo parameters such as `${AWS::Region}` stay
    /// unresolved); otherwise becomes `Fn::Sub`.
    pub fn sub(template: &str, vars: &[(&str, &Expr)]) -> Self {
        if vars.iter().all(|(_, v)| v.is_literal()) {
            let mut out = template.to_string();
            for (name, value) in vars {
                if let Expr::Literal(s) = value {
                    out = out.replace(&format!("${{{}}}", name), s);
                }
            }
            if !out.contains("${") {
                return Expr::Literal(out);
            }
        }

        if vars.is_empty() {
            return Expr::Template(json!({ "Fn::Sub": template }));
        }

        let bindings: Map<String, Value> = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_value()))
            .collect();
        Expr::Template(json!({ "Fn::Sub": [template, bindings] }))
    }

    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Expr::Literal(s) => Some(s),
            Expr::Template(_) => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Expr::Literal(_))
    }

    pub fn to_value(&self) -> Value {
        match self {
            Expr::Literal(s) => Value::String(s.clone()),
            Expr::Template(v) => v.clone(),
        }
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => Expr::Literal(s),
            Value::Number(n) => Expr::Literal(n.to_string()),
            Value::Bool(b) => Expr::Literal(b.to_string()),
            other => Expr::Template(other),
        }
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Expr::literal(value)
    }
}

impl From<String> for Expr {
    fn from(value: String) -> Self {
        Expr::Literal(value)
    }
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Expr::Literal(s) => serializer.serialize_str(s),
            Expr::Template(v) => v.serialize(serializer),
        }
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Literal(s) => f.write_str(s),
            Expr::Template(v) => write!(f, "{}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_with_literals_resolves() {
        let family = Expr::literal("terraform");
        let expr = Expr::sub("/aws/ecs/${TaskFamily}", &[("TaskFamily", &family)]);
        assert_eq!(expr, Expr::literal("/aws/ecs/terraform"));
    }

    #[test]
    fn test_sub_with_template_var_stays_template() {
        let image = Expr::get_att("Sidecar", "Outputs.Image");
        let expr = Expr::sub("Image: ${Image}", &[("Image", &image)]);
        assert_eq!(
            expr.to_value(),
            json!({ "Fn::Sub": ["Image: ${Image}", { "Image": { "Fn::GetAtt": ["Sidecar", "Outputs.Image"] } }] })
        );
    }

    #[test]
    fn test_sub_with_pseudo_parameter_stays_template() {
        let expr = Expr::sub("arn:aws:kms:${AWS::Region}:${AWS::AccountId}:key/aws/ssm", &[]);
        assert!(!expr.is_literal());
        assert_eq!(
            expr.to_value(),
            json!({ "Fn::Sub": "arn:aws:kms:${AWS::Region}:${AWS::AccountId}:key/aws/ssm" })
        );
    }

    #[test]
    fn test_numbers_become_literals() {
        let expr: Expr = serde_json::from_str("1024").unwrap();
        assert_eq!(expr, Expr::literal("1024"));

        let expr: Expr = serde_json::from_str(r#"{"Ref": "Cpu"}"#).unwrap();
        assert_eq!(expr, Expr::reference("Cpu"));
        assert_eq!(serde_json::to_string(&expr).unwrap(), r#"{"Ref":"Cpu"}"#);
    }
}
