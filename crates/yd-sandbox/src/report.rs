//! Folds the harness' flat suite and spec lists into a display tree.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;
use yd_core::{SpecRecord, SpecStatus, SuiteRecord, TestReport, TestStatus, TestSuite};

struct Node {
    record: SuiteRecord,
    specs: Vec<SpecRecord>,
    status: TestStatus,
    children: Vec<usize>,
}

/// Specs whose parent suite is unknown are dropped, as are suites whose
/// parent is unknown. Root suites are sorted by id; children keep input order.
pub fn build_report(suites: Vec<SuiteRecord>, specs: Vec<SpecRecord>) -> TestReport {
    let mut index_by_id = HashMap::new();
    let mut nodes = Vec::with_capacity(suites.len());
    for (index, record) in suites.into_iter().enumerate() {
        index_by_id.entry(record.id.clone()).or_insert(index);
        nodes.push(Node {
            record,
            specs: Vec::new(),
            status: TestStatus::Passed,
            children: Vec::new(),
        });
    }

    for spec in specs {
        let Some(parent) = spec.parent_suite_id.as_ref() else {
            continue;
        };
        if let Some(&index) = index_by_id.get(parent) {
            nodes[index].specs.push(spec);
        }
    }

    let mut overall = TestStatus::Passed;
    let mut roots = Vec::new();
    for index in 0..nodes.len() {
        let node = &mut nodes[index];
        node.specs.sort_by(|left, right| left.id.cmp(&right.id));
        if node
            .specs
            .iter()
            .any(|spec| spec.status == SpecStatus::Failed)
        {
            node.status = TestStatus::Failed;
            overall = TestStatus::Failed;
        }

        match node.record.parent_suite_id.clone() {
            None => roots.push(index),
            Some(parent) => {
                if let Some(&parent_index) = index_by_id.get(&parent) {
                    nodes[parent_index].children.push(index);
                }
            }
        }
    }

    let mut tree = roots
        .into_iter()
        .map(|index| assemble(&nodes, index, 0))
        .collect::<Vec<_>>();
    tree.sort_by(|left, right| left.id.cmp(&right.id));

    TestReport {
        suites: tree,
        status: overall,
    }
}

fn assemble(nodes: &[Node], index: usize, depth: usize) -> TestSuite {
    let node = &nodes[index];
    let children = if depth < nodes.len() {
        node.children
            .iter()
            .map(|&child| assemble(nodes, child, depth + 1))
            .collect()
    } else {
        Vec::new()
    };
    TestSuite {
        id: node.record.id.clone(),
        description: node.record.description.clone(),
        full_name: node.record.full_name.clone(),
        duration: node.record.duration,
        status: node.status,
        specs: node.specs.clone(),
        children,
    }
}

/// Accepts suites either as an array or as an object keyed by suite id.
pub fn parse_report(suites_json: &str, specs_json: &str) -> Option<TestReport> {
    let suites = match parse_suites(suites_json) {
        Ok(suites) => suites,
        Err(error) => {
            warn!(%error, "discarding test report with malformed suites");
            return None;
        }
    };
    let specs = match serde_json::from_str::<Vec<SpecRecord>>(specs_json) {
        Ok(specs) => specs,
        Err(error) => {
            warn!(%error, "discarding test report with malformed specs");
            return None;
        }
    };
    Some(build_report(suites, specs))
}

fn parse_suites(text: &str) -> Result<Vec<SuiteRecord>, serde_json::Error> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(entries) => entries
            .into_iter()
            .map(|(_, suite)| serde_json::from_value(suite))
            .collect(),
        other => serde_json::from_value(other),
    }
}
