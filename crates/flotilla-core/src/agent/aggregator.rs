//! The terminal agent: synthesizes task results into the user-visible
//! reply.
//!
//! Always invoked, even when tasks failed: the reply must say what
//! succeeded and what did not. If the aggregator's own model call
//! fails, a mechanical summary of the results stands in.

use super::dispatcher::{TaskResult, TaskStatus};

/// The aggregator's user message: the original query plus every task's
/// terminal state and output.
pub fn build_aggregator_message(user_query: &str, results: &[TaskResult]) -> String {
    let mut message = format!(
        "Original user request:\n{user_query}\n\nTask results ({} task(s)):\n",
        results.len()
    );

    for result in results {
        message.push_str(&format!(
            "\n--- {} [{}{}] ---\n",
            result.task_id,
            result.status,
            if result.partial { ", partial" } else { "" }
        ));
        if let Some(error) = &result.error {
            message.push_str(&format!("error: {error}\n"));
        }
        if !result.output_text.is_empty() {
            message.push_str(&result.output_text);
            message.push('\n');
        }
    }

    message.push_str(
        "\nWrite the reply to the user. Use only facts from the task results above, answer \
         the original request directly, and state explicitly anything that failed or was \
         skipped.",
    );
    message
}

/// Deterministic reply used when the aggregator agent itself fails.
pub fn fallback_summary(results: &[TaskResult]) -> String {
    let ok = results
        .iter()
        .filter(|r| r.status == TaskStatus::Ok)
        .count();
    let failed = results
        .iter()
        .filter(|r| r.status == TaskStatus::Failed)
        .count();
    let skipped = results
        .iter()
        .filter(|r| r.status == TaskStatus::Skipped)
        .count();

    let mut summary = format!(
        "Completed {ok} of {} task(s) ({failed} failed, {skipped} skipped).\n",
        results.len()
    );

    for result in results {
        match result.status {
            TaskStatus::Ok => {
                summary.push_str(&format!("\n[{}] ok:\n{}\n", result.task_id, result.output_text));
            }
            TaskStatus::Failed | TaskStatus::Skipped => {
                summary.push_str(&format!(
                    "\n[{}] {}: {}\n",
                    result.task_id,
                    result.status,
                    result.error.as_deref().unwrap_or("no detail")
                ));
                if !result.output_text.is_empty() {
                    summary.push_str(&format!("partial output:\n{}\n", result.output_text));
                }
            }
        }
    }

    summary
}
