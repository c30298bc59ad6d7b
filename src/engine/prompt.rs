/// Sent after a backend reattaches to its previous session.
pub const CONTINUE_PROMPT: &str =
    "The session was interrupted. Continue where you left off and keep reporting any flags you find.";

pub fn build_task_prompt(target: &str) -> String {
    format!(
        "Target: {}\n\nObjective: find and capture every flag on the target. \
         Report each flag verbatim as soon as you find it.",
        target.trim()
    )
}

/// The task followed by every operator instruction given so far.
pub fn compose_prompt(task: &str, instructions: &[String]) -> String {
    if instructions.is_empty() {
        return task.to_string();
    }

    let mut prompt = format!("{}\n\nOperator instructions:", task);
    for instruction in instructions {
        prompt.push_str("\n- ");
        prompt.push_str(instruction.trim());
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_prompt_names_target() {
        let prompt = build_task_prompt("  http://10.10.11.5:8080 ");
        assert!(prompt.starts_with("Target: http://10.10.11.5:8080\n"));
    }

    #[test]
    fn test_compose_without_instructions() {
        assert_eq!(compose_prompt("task", &[]), "task");
    }

    #[test]
    fn test_compose_lists_instructions_in_order() {
        let prompt = compose_prompt(
            "task",
            &["use sqlmap".to_string(), " then dump users ".to_string()],
        );
        assert_eq!(
            prompt,
            "task\n\nOperator instructions:\n- use sqlmap\n- then dump users"
        );
    }
}
