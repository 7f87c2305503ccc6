//! Block-rule installation into the engine router

use crate::config::BLOCK_OUTBOUND_TAG;
use crate::core::hooks::Router;
use crate::core::objects::RoutingRule;
use crate::error::{CoreError, EngineError, Result};
use crate::limiter::BlockRule;
use crate::logger::log;
use crate::utils::{format_block_rule_tag, Rollback};

/// Build the routing rule for the `index`-th expression of a node
pub fn build_block_rule(node: &str, index: usize, expr: &str) -> Result<RoutingRule> {
    let rule = BlockRule::parse(expr)?;
    Ok(RoutingRule {
        rule_tag: format_block_rule_tag(node, index),
        outbound_tag: BLOCK_OUTBOUND_TAG.to_string(),
        inbound_tag: vec![node.to_string()],
        domain: rule.routing_domain().into_iter().collect(),
        port: rule.routing_port().map(str::to_string),
    })
}

/// Install the block rules of a node, returning their tags
///
/// Either every rule is installed or none is.
pub fn add_block_rules(router: &dyn Router, node: &str, exprs: &[String]) -> Result<Vec<String>> {
    let rules = exprs
        .iter()
        .enumerate()
        .map(|(i, expr)| build_block_rule(node, i, expr))
        .collect::<Result<Vec<_>>>()?;

    let mut rollback = Rollback::new(format!("block rules of {}", node));
    let mut tags = Vec::with_capacity(rules.len());
    for rule in rules {
        let tag = rule.rule_tag.clone();
        router
            .add_rule(rule)
            .map_err(|e| CoreError::engine(format!("add block rule {}", tag), e))?;
        let undo_tag = tag.clone();
        rollback.push("block rule", move || remove_tag(router, &undo_tag));
        tags.push(tag);
    }
    rollback.commit();
    if !tags.is_empty() {
        log::debug!(node = node, count = tags.len(), "Block rules installed");
    }
    Ok(tags)
}

/// Remove rules by tag; tags that are already gone are skipped
pub fn remove_tags(router: &dyn Router, tags: &[String]) -> Result<()> {
    for tag in tags {
        remove_tag(router, tag)?;
    }
    Ok(())
}

fn remove_tag(router: &dyn Router, tag: &str) -> Result<()> {
    match router.remove_rule(tag) {
        Ok(()) | Err(EngineError::TagNotFound(_)) => Ok(()),
        Err(e) => Err(CoreError::engine(format!("remove block rule {}", tag), e)),
    }
}

/// Remove the block rules of a node by the positional tag scheme
///
/// `exprs` must be the list the rules were installed from.
pub fn remove_block_rules(router: &dyn Router, node: &str, exprs: &[String]) -> Result<()> {
    let tags: Vec<String> = (0..exprs.len())
        .map(|i| format_block_rule_tag(node, i))
        .collect();
    remove_tags(router, &tags)
}
