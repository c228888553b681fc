//! Built-in agent patterns
//!
//! The patterns a learner can pick from. Each one validates cleanly and
//! runs to an output node under the default simulator, except that a
//! routing run may take its failure branch.

use crate::builder::PatternBuilder;
use crate::error::{EngineError, Result};
use crate::types::{NodeType, PatternGraph};

/// A fixed sequence of model calls with a check in between
pub fn prompt_chaining() -> PatternGraph {
    PatternBuilder::new("prompt-chaining", "Prompt Chaining")
        .description(
            "Split a task into a fixed sequence of model calls, each building on the last result",
        )
        .input("input", "User Input")
        .node("outline", NodeType::Llm, "Write Outline")
        .node("check", NodeType::Evaluator, "Check Outline")
        .node("draft", NodeType::Llm, "Write Draft")
        .output("output", "Final Answer")
        .chain(&["input", "outline", "check", "draft", "output"])
        .build()
}

/// A router picking a specialist, with a fallback when no route fits
pub fn routing() -> PatternGraph {
    PatternBuilder::new("routing", "Routing")
        .description("Classify the request and hand it to a specialised handler")
        .input("input", "User Input")
        .node("router", NodeType::Router, "Classify Request")
        .node("billing", NodeType::Llm, "Billing Specialist")
        .node("technical", NodeType::Llm, "Technical Specialist")
        .node("fallback", NodeType::Default, "Failure Handler")
        .output("output", "Response")
        .output("fallback-output", "Fallback Response")
        .edge("input", "router")
        .edge("router", "billing")
        .edge("router", "technical")
        .edge("router", "fallback")
        .edge("billing", "output")
        .edge("technical", "output")
        .edge("fallback", "fallback-output")
        .build()
}

/// Independent sections worked on side by side and combined
pub fn parallelization() -> PatternGraph {
    PatternBuilder::new("parallelization", "Parallelization")
        .description("Run independent subtasks on separate model calls and aggregate the results")
        .input("input", "User Input")
        .node("section-a", NodeType::Llm, "Section A")
        .node("section-b", NodeType::Llm, "Section B")
        .node("section-c", NodeType::Llm, "Section C")
        .node("aggregate", NodeType::Aggregator, "Aggregate")
        .output("output", "Combined Answer")
        .edge("input", "section-a")
        .edge("input", "section-b")
        .edge("input", "section-c")
        .edge("section-a", "aggregate")
        .edge("section-b", "aggregate")
        .edge("section-c", "aggregate")
        .edge("aggregate", "output")
        .build()
}

/// A generator revised once by an evaluator's feedback
pub fn reflection() -> PatternGraph {
    PatternBuilder::new("reflection", "Reflection")
        .description(
            "One model drafts, another critiques, and the draft is revised with the feedback",
        )
        .input("input", "User Input")
        .node("generator", NodeType::Llm, "Generator")
        .node("evaluator", NodeType::Evaluator, "Evaluator")
        .output("output", "Final Answer")
        .edge("input", "generator")
        .edge("generator", "evaluator")
        .edge("evaluator", "generator")
        .edge("evaluator", "output")
        .build()
}

/// An agent calling a tool and reading its observation
pub fn tool_use() -> PatternGraph {
    PatternBuilder::new("tool-use", "Tool Use")
        .description("The agent calls a tool, reads the observation and then answers")
        .input("input", "User Input")
        .node("agent", NodeType::Llm, "Agent")
        .node("search", NodeType::Tool, "Web Search")
        .output("output", "Answer")
        .edge("input", "agent")
        .edge("agent", "search")
        .edge("search", "agent")
        .edge("agent", "output")
        .build()
}

/// A plan carried out step by step
pub fn planning() -> PatternGraph {
    PatternBuilder::new("planning", "Planning")
        .description("A planner breaks the task into steps that executors carry out in order")
        .input("input", "User Input")
        .node("planner", NodeType::Planner, "Planner")
        .node("research", NodeType::Executor, "Research Step")
        .node("lookup", NodeType::Tool, "Knowledge Base")
        .node("write", NodeType::Executor, "Writing Step")
        .output("output", "Result")
        .chain(&["input", "planner", "research", "lookup", "write", "output"])
        .build()
}

/// An orchestrator delegating to workers and synthesising their results
pub fn orchestrator_workers() -> PatternGraph {
    PatternBuilder::new("orchestrator-workers", "Orchestrator-Workers")
        .description(
            "A central model splits the task at run time, delegates to workers and synthesises",
        )
        .input("input", "User Input")
        .node("orchestrator", NodeType::Planner, "Orchestrator")
        .node("worker-1", NodeType::Executor, "Worker 1")
        .node("worker-2", NodeType::Executor, "Worker 2")
        .node("worker-3", NodeType::Executor, "Worker 3")
        .node("synthesizer", NodeType::Aggregator, "Synthesizer")
        .output("output", "Final Answer")
        .edge("input", "orchestrator")
        .edge("orchestrator", "worker-1")
        .edge("orchestrator", "worker-2")
        .edge("orchestrator", "worker-3")
        .edge("worker-1", "synthesizer")
        .edge("worker-2", "synthesizer")
        .edge("worker-3", "synthesizer")
        .edge("synthesizer", "output")
        .build()
}

/// Every built-in pattern, in the order they are usually taught
pub fn builtin_patterns() -> Vec<PatternGraph> {
    vec![
        prompt_chaining(),
        routing(),
        parallelization(),
        reflection(),
        tool_use(),
        planning(),
        orchestrator_workers(),
    ]
}

/// Look up a built-in pattern by id
pub fn find(id: &str) -> Result<PatternGraph> {
    builtin_patterns()
        .into_iter()
        .find(|p| p.id == id)
        .ok_or_else(|| EngineError::UnknownPattern(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate_pattern;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_patterns_validate() {
        for pattern in builtin_patterns() {
            let errors = validate_pattern(&pattern);
            assert!(errors.is_empty(), "{}: {:?}", pattern.id, errors);
            assert!(!pattern.description.is_empty());
            assert!(pattern.nodes_of_type(NodeType::Output).count() >= 1);
        }
    }

    #[test]
    fn test_pattern_ids_are_unique() {
        let patterns = builtin_patterns();
        let ids: HashSet<&str> = patterns.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids.len(), patterns.len());
    }

    #[test]
    fn test_find() {
        assert_eq!(find("tool-use").unwrap().name, "Tool Use");
        assert!(matches!(find("nope"), Err(EngineError::UnknownPattern(id)) if id == "nope"));
    }

    #[test]
    fn test_routing_has_failure_branch() {
        let pattern = routing();
        let handlers: Vec<_> = pattern
            .outgoing_edges("router")
            .filter(|e| pattern.leads_to_failure_handler(e))
            .collect();
        assert_eq!(handlers.len(), 1);
        assert_eq!(handlers[0].target, "fallback");
    }
}
