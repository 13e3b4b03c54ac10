//! Assembles the per-frame prompt sent to the `ModelProvider`: one block per
//! active task plus a fixed instruction body (§4.5).

use tracing::warn;

use crate::model::Task;

const PROMPT_WARN_LEN: usize = 10_000;

const INSTRUCTIONS: &str = r#"<instructions>
Compare the current frame against each task below. Respond with a JSON
object containing exactly two arrays: "task_updates" and "system_actions".

For each task, include an entry in "task_updates" only if the frame
contradicts or extends that task's latest note; otherwise omit it. A
transition away from or back to an empty/null observation is always
worth reporting. Set "task_done" to true only when the task's goal has
been fully satisfied and should be closed.

Populate "system_actions" only when a task explicitly calls for an
action and its trigger condition is currently satisfied.

Return [] for either array when nothing applies. Do not wrap the JSON
in markdown fences.
</instructions>"#;

/// Build the prompt for one inference call over `tasks`, all of which must
/// belong to the same ingestor (same `io_id`).
pub fn build_prompt(tasks: &[Task]) -> String {
    let mut body = String::new();
    for task in tasks {
        let latest = task.latest_note();
        body.push_str(&format!(
            "<task number=\"{}\">\n  description: {}\n",
            task.task_number,
            task.task_desc()
        ));
        match latest {
            Some(note) => body.push_str(&format!(
                "  latest_note: {} (at {})\n",
                note.content,
                note.human_timestamp()
            )),
            None => body.push_str("  latest_note: (none yet)\n"),
        }
        body.push_str("</task>\n");
    }

    let prompt = format!("{body}\n{INSTRUCTIONS}");
    if prompt.len() > PROMPT_WARN_LEN {
        warn!(len = prompt.len(), "Assembled prompt exceeds 10,000 characters");
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_task_list_still_includes_instructions() {
        let prompt = build_prompt(&[]);
        assert!(prompt.contains("task_updates"));
    }

    #[test]
    fn task_with_no_notes_reports_none_yet() {
        let task = Task::new("0".into(), 0, "watch the door".into(), "0".into());
        let prompt = build_prompt(&[task]);
        assert!(prompt.contains("(none yet)"));
        assert!(prompt.contains("watch the door"));
    }

    #[test]
    fn task_with_a_note_includes_its_content_and_timestamp() {
        let task = Task::new("0".into(), 0, "watch the door".into(), "0".into());
        task.push_note(crate::model::NoteEntry::new("door is closed", 1_700_000_000));
        let prompt = build_prompt(&[task]);
        assert!(prompt.contains("door is closed"));
    }

    #[test]
    fn long_task_list_still_produces_a_single_string() {
        let tasks: Vec<Task> = (0..50)
            .map(|n| Task::new(n.to_string(), n, format!("task number {n} description padding"), "0".into()))
            .collect();
        let prompt = build_prompt(&tasks);
        assert!(prompt.len() > 0);
    }
}
