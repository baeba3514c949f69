/// Result Comparison - Expected Fixture vs Indexed Documents
///
/// **Core Responsibility:**
/// Decide whether the documents the processor indexed match the fixture.
///
/// **Properties:**
/// - Knows nothing about Docker or the data store's transport
/// - Pure function: (expected fixture, search response) → report
///
/// **Rules:**
/// - Hits are compared by position, on `_source` only
/// - A different hit count is its own failure, in either direction
/// - Every expected position is reported; a short result never panics

use serde_json::Value;
use std::fmt;

/// Expected output file shape: `{"hits": [ <_source>, ... ]}`
pub fn expected_hits(fixture: &Value) -> Result<&[Value], String> {
    fixture
        .get("hits")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| "expected output must be an object with a \"hits\" array".to_string())
}

/// `_source` of every hit in a search response, in result order
pub fn actual_sources(response: &Value) -> Result<Vec<&Value>, String> {
    let hits = response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .ok_or_else(|| "search response has no hits.hits array".to_string())?;

    Ok(hits
        .iter()
        .map(|hit| hit.get("_source").unwrap_or(&Value::Null))
        .collect())
}

/// One position where expected and actual differ
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    pub position: usize,
    pub expected: Option<Value>,
    pub actual: Option<Value>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render = |v: &Option<Value>| match v {
            Some(value) => value.to_string(),
            None => "<missing>".to_string(),
        };
        write!(
            f,
            "hit {}: expected {} but got {}",
            self.position,
            render(&self.expected),
            render(&self.actual)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComparisonReport {
    pub expected_count: usize,
    pub actual_count: usize,
    pub mismatches: Vec<Mismatch>,
}

impl ComparisonReport {
    pub fn count_matches(&self) -> bool {
        self.expected_count == self.actual_count
    }

    pub fn passed(&self) -> bool {
        self.count_matches() && self.mismatches.is_empty()
    }
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.count_matches() {
            writeln!(
                f,
                "hit count mismatch: expected {} but got {}",
                self.expected_count, self.actual_count
            )?;
        }
        for mismatch in &self.mismatches {
            writeln!(f, "{}", mismatch)?;
        }
        Ok(())
    }
}

/// Compare expected `_source` documents against actual ones, position by position
pub fn compare(expected: &[Value], actual: &[&Value]) -> ComparisonReport {
    let mut mismatches = Vec::new();

    for (position, want) in expected.iter().enumerate() {
        match actual.get(position) {
            Some(got) if *got == want => {}
            Some(got) => mismatches.push(Mismatch {
                position,
                expected: Some(want.clone()),
                actual: Some((*got).clone()),
            }),
            None => mismatches.push(Mismatch {
                position,
                expected: Some(want.clone()),
                actual: None,
            }),
        }
    }

    for (position, extra) in actual.iter().enumerate().skip(expected.len()) {
        mismatches.push(Mismatch {
            position,
            expected: None,
            actual: Some((*extra).clone()),
        });
    }

    ComparisonReport {
        expected_count: expected.len(),
        actual_count: actual.len(),
        mismatches,
    }
}

/// Compare a loaded expected-output fixture against a raw search response
pub fn compare_response(fixture: &Value, response: &Value) -> Result<ComparisonReport, String> {
    let expected = expected_hits(fixture)?;
    let actual = actual_sources(response)?;
    Ok(compare(expected, &actual))
}
