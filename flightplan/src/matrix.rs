//! Matrix algebra for scenario variants.
//!
//! A matrix owns an ordered list of vectors; a vector is an ordered list of
//! key/value elements. Matrices are value-like: every algebraic operation
//! returns a fresh matrix and never mutates its inputs.

use std::collections::HashSet;
use std::fmt;

use hcl::Value;
use hcl_edit::structure::Block;
use peregrine_diagnostics::{Diagnostic, Diagnostics, SourceFiles, compact_value_str};

use crate::filter::ScenarioFilter;
use crate::schema::{
    attr_value_span, attributes, block_type_span, blocks, blocks_of_type, eval_error_diag,
    evaluate,
};
use crate::scope::EvalScope;

/// One key/value pair within a vector. The key is a matrix axis name.
#[derive(Clone, Debug, PartialEq)]
pub struct Element {
    pub key: String,
    pub value: Value,
}

impl Element {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Scalar display form: strings unquoted, other values compact.
    pub fn value_display(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => compact_value_str(other),
        }
    }

    /// Element match for filters: same key and same rendered value. Filters
    /// arrive as text tokens, so comparison happens on the display form.
    pub fn matches(&self, other: &Element) -> bool {
        self.key == other.key && self.value_display() == other.value_display()
    }

    fn unique_key(&self) -> String {
        format!("{}\u{1f}{:?}", self.key, self.value)
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key, self.value_display())
    }
}

/// A single point in the matrix. Equality is element-wise and
/// order-sensitive; immutable once constructed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Vector {
    elements: Vec<Element>,
}

impl Vector {
    pub fn new(elements: Vec<Element>) -> Self {
        Self { elements }
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn contains_element(&self, element: &Element) -> bool {
        self.elements.iter().any(|e| e.matches(element))
    }

    /// True when every element of `other` is present in `self`, regardless
    /// of order.
    pub fn contains_unordered(&self, other: &Vector) -> bool {
        other.elements.iter().all(|e| self.contains_element(e))
    }

    /// A copy with elements sorted by key, the canonical form used for
    /// scenario variant tags.
    #[must_use]
    pub fn sorted_by_key(&self) -> Vector {
        let mut elements = self.elements.clone();
        elements.sort_by(|a, b| a.key.cmp(&b.key));
        Vector { elements }
    }

    /// The vector as an evaluation-context value: an object of axis name to
    /// axis value.
    pub fn value(&self) -> Value {
        let mut map = hcl::value::Map::new();
        for element in &self.elements {
            map.insert(element.key.clone(), element.value.clone());
        }
        Value::Object(map)
    }

    fn unique_key(&self) -> String {
        let keys: Vec<String> = self.elements.iter().map(Element::unique_key).collect();
        keys.join("\u{1e}")
    }

    fn concat(&self, other: &Vector) -> Vector {
        let mut elements = self.elements.clone();
        elements.extend(other.elements.iter().cloned());
        Vector { elements }
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, element) in self.elements.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{element}")?;
        }
        f.write_str("]")
    }
}

impl FromIterator<Element> for Vector {
    fn from_iter<I: IntoIterator<Item = Element>>(iter: I) -> Self {
        Self {
            elements: iter.into_iter().collect(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Matrix {
    vectors: Vec<Vector>,
}

impl Matrix {
    pub fn new(vectors: Vec<Vector>) -> Self {
        Self { vectors }
    }

    pub fn vectors(&self) -> &[Vector] {
        &self.vectors
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Appends a vector without deduplication; uniqueness is handled lazily
    /// by [`Matrix::unique_values`].
    pub fn add_vector(&mut self, vector: Vector) {
        self.vectors.push(vector);
    }

    /// Cartesian product: for every `a` in `self` and `b` in `other`, the
    /// concatenation `a ++ b`.
    #[must_use]
    pub fn product(&self, other: &Matrix) -> Matrix {
        let mut vectors = Vec::with_capacity(self.vectors.len() * other.vectors.len());
        for a in &self.vectors {
            for b in &other.vectors {
                vectors.push(a.concat(b));
            }
        }
        Matrix { vectors }
    }

    /// Vectors deduplicated by value equality, first occurrence wins, order
    /// preserved.
    #[must_use]
    pub fn unique_values(&self) -> Matrix {
        let mut seen = HashSet::new();
        let mut vectors = Vec::with_capacity(self.vectors.len());
        for vector in &self.vectors {
            if seen.insert(vector.unique_key()) {
                vectors.push(vector.clone());
            }
        }
        Matrix { vectors }
    }

    pub fn has_vector(&self, vector: &Vector) -> bool {
        let key = vector.unique_key();
        self.vectors.iter().any(|v| v.unique_key() == key)
    }

    /// The subset of vectors satisfying the filter: a vector is kept when
    /// its elements are a superset of every include element and it shares no
    /// element with any exclude. An include set that names every axis acts
    /// as an exact vector match.
    #[must_use]
    pub fn filter(&self, filter: &ScenarioFilter) -> Matrix {
        let vectors = self
            .vectors
            .iter()
            .filter(|v| {
                filter.includes().iter().all(|e| v.contains_element(e))
                    && !filter.excludes().iter().any(|e| v.contains_element(e))
            })
            .cloned()
            .collect();
        Matrix { vectors }
    }

    /// Vectors present, by value, in both matrices; order follows `self`.
    #[must_use]
    pub fn intersect(&self, other: &Matrix) -> Matrix {
        let other_keys: HashSet<String> =
            other.vectors.iter().map(Vector::unique_key).collect();
        let vectors = self
            .vectors
            .iter()
            .filter(|v| other_keys.contains(&v.unique_key()))
            .cloned()
            .collect();
        Matrix { vectors }
    }
}

/// Decodes the `matrix{}` block of a scenario block, when present.
///
/// Each attribute is an axis whose value must be a non-empty list of scalar
/// values; axes product-fold in declaration order. Nested `include{}` blocks
/// append vectors after the product, `exclude{}` blocks remove every vector
/// that contains one of theirs. The result is deduplicated by value.
pub(crate) fn decode_matrix(
    scenario_block: &Block,
    scope: &EvalScope,
    sources: &SourceFiles,
    filename: &str,
) -> (Option<Matrix>, Diagnostics) {
    let mut diags = Diagnostics::new();

    let matrix_blocks: Vec<&Block> = blocks_of_type(&scenario_block.body, "matrix").collect();
    let Some(block) = matrix_blocks.first() else {
        return (None, diags);
    };
    for extra in &matrix_blocks[1..] {
        let diag = Diagnostic::error("a scenario can only have one matrix block")
            .with_detail("additional matrix blocks are ignored");
        diags.push(sources.attach_snippet(diag, filename, &block_type_span(extra), None));
    }

    let ctx = scope.context();
    let mut matrix: Option<Matrix> = None;
    let mut includes = Vec::new();
    let mut excludes = Vec::new();

    for attr in attributes(&block.body) {
        if let Some(axis) = decode_axis(attr, &ctx, sources, filename, &mut diags) {
            matrix = Some(match matrix {
                Some(m) => m.product(&axis),
                None => axis,
            });
        }
    }

    for nested in blocks(&block.body) {
        let target = match nested.ident.as_str() {
            "include" => &mut includes,
            "exclude" => &mut excludes,
            other => {
                let diag = Diagnostic::error("unsupported block").with_detail(format!(
                    "a block of type {other:?} is not expected in matrix blocks",
                ));
                diags.push(sources.attach_snippet(
                    diag,
                    filename,
                    &block_type_span(nested),
                    None,
                ));
                continue;
            }
        };

        let mut sub: Option<Matrix> = None;
        for attr in attributes(&nested.body) {
            if let Some(axis) = decode_axis(attr, &ctx, sources, filename, &mut diags) {
                sub = Some(match sub {
                    Some(m) => m.product(&axis),
                    None => axis,
                });
            }
        }
        if let Some(sub) = sub {
            target.extend(sub.vectors);
        }
    }

    let Some(mut matrix) = matrix else {
        return (Some(Matrix::default()), diags);
    };

    for vector in includes {
        matrix.add_vector(vector);
    }
    matrix.vectors.retain(|v| {
        !excludes
            .iter()
            .any(|excluded: &Vector| v.contains_unordered(excluded))
    });

    (Some(matrix.unique_values()), diags)
}

fn decode_axis(
    attr: &hcl_edit::structure::Attribute,
    ctx: &hcl::eval::Context,
    sources: &SourceFiles,
    filename: &str,
    diags: &mut Diagnostics,
) -> Option<Matrix> {
    let key = attr.key.as_str().to_string();

    let value = match evaluate(&attr.value, ctx) {
        Ok(value) => value,
        Err(err) => {
            diags.push(eval_error_diag(&err, attr, sources, filename, ctx));
            return None;
        }
    };

    let items = match value {
        Value::Array(items) if !items.is_empty() => items,
        _ => {
            let diag = Diagnostic::error("matrix axis must be a list of values").with_detail(
                format!("the {key:?} axis must be a non-empty list of scalar values"),
            );
            diags.push(sources.attach_snippet(
                diag,
                filename,
                &attr_value_span(attr),
                None,
            ));
            return None;
        }
    };

    let mut vectors = Vec::with_capacity(items.len());
    for item in items {
        if !matches!(item, Value::String(_) | Value::Number(_) | Value::Bool(_)) {
            let diag = Diagnostic::error("matrix axis values must be scalar").with_detail(
                format!(
                    "the {key:?} axis contains {}, expected a string, number or bool",
                    compact_value_str(&item)
                ),
            );
            diags.push(sources.attach_snippet(
                diag,
                filename,
                &attr_value_span(attr),
                None,
            ));
            return None;
        }
        vectors.push(Vector::new(vec![Element {
            key: key.clone(),
            value: item,
        }]));
    }

    Some(Matrix::new(vectors))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec_of(pairs: &[(&str, &str)]) -> Vector {
        pairs
            .iter()
            .map(|(k, v)| Element::new(*k, *v))
            .collect()
    }

    fn axis(key: &str, values: &[&str]) -> Matrix {
        Matrix::new(
            values
                .iter()
                .map(|v| Vector::new(vec![Element::new(key, *v)]))
                .collect(),
        )
    }

    fn canonical(m: &Matrix) -> Vec<String> {
        let mut out: Vec<String> = m
            .vectors()
            .iter()
            .map(|v| v.sorted_by_key().to_string())
            .collect();
        out.sort();
        out
    }

    #[test]
    fn product_is_cartesian() {
        let a = axis("distro", &["ubuntu", "rhel"]);
        let b = axis("arch", &["amd64", "arm64"]);

        let p = a.product(&b);
        assert_eq!(p.len(), 4);
        assert_eq!(p.vectors()[0].to_string(), "[distro:ubuntu arch:amd64]");
        assert_eq!(p.vectors()[3].to_string(), "[distro:rhel arch:arm64]");
    }

    #[test]
    fn product_is_associative_and_commutative_under_unique_values() {
        let a = axis("a", &["1", "2"]);
        let b = axis("b", &["x"]);
        let c = axis("c", &["y", "z"]);

        let left = a.product(&b).product(&c).unique_values();
        let right = a.product(&b.product(&c)).unique_values();
        assert_eq!(canonical(&left), canonical(&right));

        let forward = a.product(&b).unique_values();
        let backward = b.product(&a).unique_values();
        assert_eq!(canonical(&forward), canonical(&backward));
    }

    #[test]
    fn unique_values_first_occurrence_wins() {
        let mut m = Matrix::default();
        m.add_vector(vec_of(&[("distro", "ubuntu")]));
        m.add_vector(vec_of(&[("distro", "rhel")]));
        m.add_vector(vec_of(&[("distro", "ubuntu")]));

        let uniq = m.unique_values();
        assert_eq!(uniq.len(), 2);
        assert_eq!(uniq.vectors()[0].to_string(), "[distro:ubuntu]");
        assert_eq!(uniq.vectors()[1].to_string(), "[distro:rhel]");
    }

    #[test]
    fn filter_is_idempotent() {
        let m = axis("distro", &["ubuntu", "rhel", "amzn"]);
        let filter = ScenarioFilter::parse("distro:rhel !distro:amzn").unwrap();

        let once = m.filter(&filter);
        let twice = once.filter(&filter);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 1);
        assert_eq!(once.vectors()[0].to_string(), "[distro:rhel]");
    }

    #[test]
    fn filter_excludes_match_any_element() {
        let m = axis("distro", &["ubuntu", "rhel"]).product(&axis("arch", &["amd64", "arm64"]));
        let filter = ScenarioFilter::parse("!arch:arm64").unwrap();

        let filtered = m.filter(&filter);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.vectors().iter().all(|v| {
            !v.contains_element(&Element::new("arch", "arm64"))
        }));
    }

    #[test]
    fn intersect_keeps_vectors_in_both() {
        let a = axis("distro", &["ubuntu", "rhel", "amzn"]);
        let b = axis("distro", &["rhel", "amzn", "sles"]);

        let both = a.intersect(&b);
        assert_eq!(both.len(), 2);
        assert_eq!(both.vectors()[0].to_string(), "[distro:rhel]");
    }

    #[test]
    fn contains_unordered_ignores_element_order() {
        let v = vec_of(&[("distro", "ubuntu"), ("arch", "amd64")]);
        let reversed = vec_of(&[("arch", "amd64"), ("distro", "ubuntu")]);

        assert!(v.contains_unordered(&reversed));
        assert!(reversed.contains_unordered(&v));
        assert_ne!(v, reversed);

        let partial = vec_of(&[("arch", "amd64")]);
        assert!(v.contains_unordered(&partial));
        assert!(!partial.contains_unordered(&v));
    }

    #[test]
    fn vector_value_is_an_object() {
        let v = vec_of(&[("distro", "ubuntu")]);
        let value = v.value();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.get("distro"), Some(&Value::from("ubuntu")));
    }
}
