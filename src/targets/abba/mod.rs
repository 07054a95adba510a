//! The "Abba" family: a string array built by an IIFE, a shift/push
//! rotator, thin proxy functions over the array, and a custom module
//! loader that routes factories through a registry object.
//!
//! Unlike the obfuscator.io pipeline, every step here is an independent
//! transform; the order below matters only in that earlier steps expose
//! the literals later steps clean up.

pub mod literals;
pub mod loader;
pub mod member_expr;
pub mod proxy;
pub mod rotator;
pub mod string_array;

use swc_core::ecma::ast::Program;

use crate::context::DeobfuscatorContext;
use crate::dead_code::DeadCode;
use crate::error::DetectionError;
use crate::target::{Detection, Target, TargetMeta};
use crate::transform::apply_transform;

pub struct Abba;

static META: TargetMeta = TargetMeta {
    id: "abba",
    name: "Abba",
    description: Some("string-array obfuscation with proxy functions and a custom module loader"),
    tags: &["string-array", "module-loader"],
};

impl Target for Abba {
    fn meta(&self) -> &TargetMeta {
        &META
    }

    fn detect(&self, program: &mut Program) -> Result<Option<Detection>, DetectionError> {
        let mut score = 0.0;
        let mut details = Vec::new();

        if string_array::find_candidate(program) {
            score += 0.4;
            details.push("string-array IIFE");
        }
        if rotator::find_candidate(program) {
            score += 0.2;
            details.push("rotator");
        }
        if proxy::find_candidate(program) {
            score += 0.2;
            details.push("proxy function");
        }
        if loader::find_candidate(program) {
            score += 0.2;
            details.push("module loader");
        }

        if score == 0.0 {
            return Ok(None);
        }
        Ok(Some(Detection::new(score, Some(details.join(", ")))))
    }

    fn deobfuscate(&self, ctx: &mut DeobfuscatorContext<'_>) {
        let logger = ctx.logger;
        apply_transform(
            &mut string_array::StringArrayExtractor,
            ctx.program,
            ctx.state,
            &logger,
        );
        apply_transform(
            &mut rotator::StringArrayRotator,
            ctx.program,
            ctx.state,
            &logger,
        );
        apply_transform(
            &mut proxy::ProxyInliner::new(logger),
            ctx.program,
            ctx.state,
            &logger,
        );
        apply_transform(
            &mut literals::LiteralNormalizer,
            ctx.program,
            ctx.state,
            &logger,
        );
        apply_transform(
            &mut member_expr::MemberExpressionSimplifier,
            ctx.program,
            ctx.state,
            &logger,
        );
        apply_transform(
            &mut loader::ModuleLoaderResolver,
            ctx.program,
            ctx.state,
            &logger,
        );
        apply_transform(&mut DeadCode, ctx.program, ctx.state, &logger);
    }
}
