//! Execution events read from JUnit XML reports.
//!
//! Lets any CI job that already produces JUnit XML drive the delivery
//! pipeline without a framework listener.
//!
//! # Mapping
//!
//! ```text
//! <testsuites name=S>                  suite_name = S
//!   <testsuite name=T timestamp=..>    test_name  = T  (suite_name = T if S absent)
//!     <testcase classname=C name=M time=secs>
//!       <failure message=..>           status = fail, message added to outputs
//!       <error/>                       status = fail
//!       <skipped/>                     status = skip
//!       <system-out>line\nline</...>   outputs
//! ```
//!
//! Start times are laid out back to back from the suite's `timestamp`
//! (read as UTC), so each event's duration matches its `time` attribute.

use std::path::Path;

use chrono::NaiveDateTime;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::{EventError, EventResult, ExecutionEvent};
use crate::record::{CaseStatus, ConfigurationPhase};

/// Reads a JUnit XML report from a file.
pub fn load_junit_events(path: &Path) -> EventResult<Vec<ExecutionEvent>> {
    let content = std::fs::read_to_string(path)?;
    parse_junit_events(&content)
}

/// Which text element we are inside of.
#[derive(Clone, Copy, PartialEq)]
enum TextTarget {
    None,
    Output,
    Failure,
}

#[derive(Default)]
struct SuiteContext {
    run_name: Option<String>,
    name: Option<String>,
    cursor_millis: i64,
}

/// Parses JUnit XML content into execution events, one per `testcase`.
pub fn parse_junit_events(content: &str) -> EventResult<Vec<ExecutionEvent>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut events = Vec::new();
    let mut suite = SuiteContext::default();
    let mut current: Option<ExecutionEvent> = None;
    let mut text_target = TextTarget::None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| parse_error(&reader, e))?;

        match event {
            Event::Start(e) => match e.name().as_ref() {
                b"testsuites" => suite.run_name = attribute(&e, "name")?,
                b"testsuite" => enter_suite(&mut suite, &e)?,
                b"testcase" => current = Some(start_case(&mut suite, &e)?),
                b"failure" | b"error" => {
                    if let Some(case) = current.as_mut() {
                        mark_failed(case, &e)?;
                        text_target = TextTarget::Failure;
                    }
                }
                b"skipped" => {
                    if let Some(case) = current.as_mut() {
                        case.status = CaseStatus::Skip;
                    }
                }
                b"system-out" | b"system-err" if current.is_some() => {
                    text_target = TextTarget::Output;
                }
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"testcase" => events.push(start_case(&mut suite, &e)?),
                b"testsuite" => enter_suite(&mut suite, &e)?,
                b"failure" | b"error" => {
                    if let Some(case) = current.as_mut() {
                        mark_failed(case, &e)?;
                    }
                }
                b"skipped" => {
                    if let Some(case) = current.as_mut() {
                        case.status = CaseStatus::Skip;
                    }
                }
                _ => {}
            },
            Event::Text(t) => {
                if text_target == TextTarget::Output {
                    let text = t.unescape().map_err(|e| parse_error(&reader, e))?;
                    push_lines(current.as_mut(), &text);
                }
            }
            Event::CData(c) => {
                if text_target == TextTarget::Output {
                    let bytes = c.into_inner();
                    push_lines(current.as_mut(), &String::from_utf8_lossy(&bytes));
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"testcase" => {
                    if let Some(case) = current.take() {
                        events.push(case);
                    }
                }
                b"failure" | b"error" | b"system-out" | b"system-err" => {
                    text_target = TextTarget::None;
                }
                b"testsuite" => suite.name = None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    tracing::debug!("Parsed {} test cases from JUnit XML", events.len());
    Ok(events)
}

fn parse_error(reader: &Reader<&[u8]>, err: impl std::fmt::Display) -> EventError {
    EventError::Parse(format!(
        "invalid JUnit XML at byte {}: {}",
        reader.buffer_position(),
        err
    ))
}

fn attribute(element: &BytesStart<'_>, name: &str) -> EventResult<Option<String>> {
    let attr = element
        .try_get_attribute(name)
        .map_err(|e| EventError::Parse(format!("invalid attribute {}: {}", name, e)))?;

    match attr {
        Some(attr) => {
            let value = attr
                .unescape_value()
                .map_err(|e| EventError::Parse(format!("invalid attribute {}: {}", name, e)))?;
            Ok(Some(value.into_owned()))
        }
        None => Ok(None),
    }
}

fn enter_suite(suite: &mut SuiteContext, element: &BytesStart<'_>) -> EventResult<()> {
    suite.name = attribute(element, "name")?;
    suite.cursor_millis = attribute(element, "timestamp")?
        .as_deref()
        .and_then(parse_suite_timestamp)
        .unwrap_or(0);
    Ok(())
}

/// Accepts `2024-03-01T10:00:00` with optional fractional seconds.
fn parse_suite_timestamp(value: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}

fn start_case(suite: &mut SuiteContext, element: &BytesStart<'_>) -> EventResult<ExecutionEvent> {
    let name = attribute(element, "name")?
        .ok_or_else(|| EventError::Parse("testcase without a name attribute".to_string()))?;
    let class_name = attribute(element, "classname")?.filter(|c| !c.is_empty());
    let duration = duration_millis(attribute(element, "time")?.as_deref());

    let start_millis = suite.cursor_millis;
    let end_millis = start_millis.checked_add(duration).unwrap_or(start_millis);
    suite.cursor_millis = end_millis;

    Ok(ExecutionEvent {
        method_name: name,
        class_name,
        test_name: suite.name.clone(),
        suite_name: suite.run_name.clone().or_else(|| suite.name.clone()),
        start_millis,
        end_millis,
        status: CaseStatus::Pass,
        outputs: Vec::new(),
        phase: ConfigurationPhase::Test,
        date_millis: None,
    })
}

/// Converts a `time` attribute in seconds to milliseconds.
///
/// Missing, unparsable, negative and unrepresentable values count as zero.
fn duration_millis(time: Option<&str>) -> i64 {
    time.and_then(|t| t.trim().parse::<f64>().ok())
        .map(|seconds| (seconds * 1000.0).round())
        .filter(|millis| millis.is_finite() && *millis >= 0.0 && *millis < i64::MAX as f64)
        .map_or(0, |millis| millis as i64)
}

fn mark_failed(case: &mut ExecutionEvent, element: &BytesStart<'_>) -> EventResult<()> {
    case.status = CaseStatus::Fail;
    if let Some(message) = attribute(element, "message")?.filter(|m| !m.is_empty()) {
        case.outputs.push(message);
    }
    Ok(())
}

fn push_lines(case: Option<&mut ExecutionEvent>, text: &str) {
    if let Some(case) = case {
        case.outputs.extend(
            text.lines()
                .map(str::trim_end)
                .filter(|l| !l.is_empty())
                .map(String::from),
        );
    }
}
