//! Helpers over the parsed HCL syntax tree: body iteration, strict schema
//! verification, span extraction and expression evaluation.

use hcl::eval::{Context, Evaluate};
use hcl_edit::Span;
use hcl_edit::structure::{Attribute, Block, BlockLabel, Body};
use peregrine_diagnostics::{ByteSpan, Diagnostic, Diagnostics, SourceFiles};

pub(crate) fn attributes(body: &Body) -> impl Iterator<Item = &Attribute> {
    body.iter().filter_map(|s| s.as_attribute())
}

pub(crate) fn blocks(body: &Body) -> impl Iterator<Item = &Block> {
    body.iter().filter_map(|s| s.as_block())
}

pub(crate) fn blocks_of_type<'a>(body: &'a Body, ty: &'a str) -> impl Iterator<Item = &'a Block> {
    blocks(body).filter(move |b| b.ident.as_str() == ty)
}

pub(crate) fn get_attr<'a>(body: &'a Body, name: &str) -> Option<&'a Attribute> {
    attributes(body).find(|a| a.key.as_str() == name)
}

pub(crate) fn label_str(label: &BlockLabel) -> &str {
    match label {
        BlockLabel::Ident(ident) => ident.as_str(),
        BlockLabel::String(s) => s.as_str(),
    }
}

pub(crate) fn first_label(block: &Block) -> Option<&str> {
    block.labels.first().map(label_str)
}

fn span_or_empty(span: Option<ByteSpan>) -> ByteSpan {
    span.unwrap_or(0..0)
}

pub(crate) fn block_type_span(block: &Block) -> ByteSpan {
    span_or_empty(block.ident.span())
}

pub(crate) fn block_def_span(block: &Block) -> ByteSpan {
    span_or_empty(block.span().or_else(|| block.ident.span()))
}

pub(crate) fn label_span(label: &BlockLabel) -> ByteSpan {
    match label {
        BlockLabel::Ident(ident) => span_or_empty(ident.span()),
        BlockLabel::String(s) => span_or_empty(s.span()),
    }
}

pub(crate) fn attr_key_span(attr: &Attribute) -> ByteSpan {
    span_or_empty(attr.key.span())
}

pub(crate) fn attr_value_span(attr: &Attribute) -> ByteSpan {
    span_or_empty(attr.value.span().or_else(|| attr.key.span()))
}

/// Converts a syntax-tree expression into an evaluable one.
pub(crate) fn to_expression(expr: &hcl_edit::expr::Expression) -> hcl::Expression {
    hcl::Expression::from(expr.clone())
}

pub(crate) fn evaluate(
    expr: &hcl_edit::expr::Expression,
    ctx: &Context,
) -> Result<hcl::Value, hcl::eval::Error> {
    to_expression(expr).evaluate(ctx)
}

/// Builds an evaluation-failure diagnostic for an attribute, attaching the
/// snippet and the current values of every variable the expression
/// references.
pub(crate) fn eval_error_diag(
    err: &hcl::eval::Error,
    attr: &Attribute,
    sources: &SourceFiles,
    filename: &str,
    ctx: &Context,
) -> Diagnostic {
    let diag = Diagnostic::error(format!(
        "failed to evaluate {name}",
        name = attr.key.as_str()
    ))
    .with_detail(err.to_string());

    sources.attach_snippet_with_values(
        diag,
        filename,
        &attr_value_span(attr),
        None,
        &to_expression(&attr.value),
        ctx,
    )
}

/// A strict block schema: unknown attributes and unknown nested blocks are
/// errors. Required attributes are enforced by the individual decoders.
pub(crate) struct BlockSchema {
    pub attrs: &'static [&'static str],
    pub blocks: &'static [&'static str],
}

impl BlockSchema {
    /// When set, attributes not named in `attrs` are absorbed by the decoder
    /// instead of being rejected (the module block does this).
    pub(crate) fn verify(
        &self,
        block: &Block,
        sources: &SourceFiles,
        filename: &str,
        absorb_unknown_attrs: bool,
    ) -> Diagnostics {
        let mut diags = Diagnostics::new();

        if !absorb_unknown_attrs {
            for attr in attributes(&block.body) {
                if self.attrs.contains(&attr.key.as_str()) {
                    continue;
                }
                let diag = Diagnostic::error("unsupported argument").with_detail(format!(
                    "an argument named {:?} is not expected in {:?} blocks",
                    attr.key.as_str(),
                    block.ident.as_str(),
                ));
                diags.push(sources.attach_snippet(
                    diag,
                    filename,
                    &attr_key_span(attr),
                    Some(&block_def_span(block)),
                ));
            }
        }

        for nested in blocks(&block.body) {
            if self.blocks.contains(&nested.ident.as_str()) {
                continue;
            }
            let diag = Diagnostic::error("unsupported block").with_detail(format!(
                "a block of type {:?} is not expected in {:?} blocks",
                nested.ident.as_str(),
                block.ident.as_str(),
            ));
            diags.push(sources.attach_snippet(
                diag,
                filename,
                &block_type_span(nested),
                Some(&block_def_span(block)),
            ));
        }

        diags
    }
}

/// A required attribute was not declared.
pub(crate) fn missing_attr_diag(
    block: &Block,
    name: &str,
    sources: &SourceFiles,
    filename: &str,
) -> Diagnostic {
    let diag = Diagnostic::error(format!("missing required argument {name:?}")).with_detail(
        format!(
            "{:?} blocks must declare a value for {name:?}",
            block.ident.as_str()
        ),
    );
    sources.attach_snippet(
        diag,
        filename,
        &block_type_span(block),
        Some(&block_def_span(block)),
    )
}
