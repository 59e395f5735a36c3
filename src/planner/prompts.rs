//! Reasoner 使用的提示词模板

use serde_json::Value;

use crate::planner::reasoner::ToolExchange;
use crate::tools::ToolDefinition;

pub const SYSTEM_PROMPT: &str = "You are a helpful agent who has access to an abundance of tools.";

/// 前序步骤信息：`1. 描述: 结果`，没有时为 `[]`
pub fn format_previous(previous: &[(String, String)]) -> String {
    if previous.is_empty() {
        return "[]".to_string();
    }
    previous
        .iter()
        .enumerate()
        .map(|(i, (task, result))| format!("{}. {task}: {result}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn decomposition_prompt(
    task: &str,
    tool_names: &[String],
    previous: &[(String, String)],
    failed_plans: &[Vec<String>],
    schema: &str,
) -> String {
    let mut prompt = format!(
        "Decompose the following task into actionable subtasks, i.e., each subtask should be solvable with a single tool:\n\
         {task}\n\
         You have access to tools such as the following:\n\
         {tools:?}\n\
         Consider the following information from previous steps:\n\
         {previous}\n",
        tools = tool_names,
        previous = format_previous(previous),
    );
    if !failed_plans.is_empty() {
        let failed = failed_plans
            .iter()
            .map(|plan| plan.join(", "))
            .collect::<Vec<_>>()
            .join("\n");
        prompt.push_str(&format!(
            "Note that the following decompositions failed, so you should adapt the plan accordingly:\n{failed}\n"
        ));
    }
    prompt.push_str(&format!(
        "\nReturn an ordered list of steps described in natural language.\n\
         Important: If decomposing further is not sensible considering the available tools, \
         return an empty list and do not execute the task.\n\
         Reply with JSON matching this schema:\n{schema}\n"
    ));
    prompt
}

pub fn task_prompt(
    task: &str,
    tools: &[ToolDefinition],
    verbose_ids: bool,
    previous: &[(String, String)],
    transcript: &[ToolExchange],
    schema: &str,
) -> String {
    let functions: Vec<Value> = tools.iter().map(|t| t.to_function_json(verbose_ids)).collect();
    let functions = serde_json::to_string_pretty(&functions).unwrap_or_default();
    let mut prompt = format!(
        "Solve the following task using exactly one of the tools you have available:\n\
         `{task}`\n\
         Available tools:\n{functions}\n\
         Consider the following information from previous steps:\n\
         {previous}\n",
        previous = format_previous(previous),
    );
    if !transcript.is_empty() {
        prompt.push_str("Tool calls made so far and their results:\n");
        for exchange in transcript {
            prompt.push_str(&format!(
                "- {}({}) -> {}\n",
                exchange.call.name, exchange.call.arguments, exchange.output
            ));
        }
    }
    prompt.push_str(&format!(
        "\nEither request tool calls or give the final answer. \
         If there is no suitable tool available, answer with an empty string.\n\
         Reply with JSON matching this schema:\n{schema}\n"
    ));
    prompt
}

pub fn aggregate_prompt(task: &str, information: &[(String, String)]) -> String {
    format!(
        "Return the solution to the following task based on the information provided.\n\
         Task:\n{task}\n\
         Information:\n{}\n\
         If you cannot deduce the solution from the information provided return an empty string.\n",
        format_previous(information)
    )
}

pub fn paraphrase_prompt(task: &str) -> String {
    format!(
        "Paraphrase the following task so that it can better be matched to tool descriptions:\n{task}\n\
         Reply with the paraphrased task only."
    )
}

pub fn tool_create_prompt(task: &str, interpreter: &str, feedback: Option<&str>) -> String {
    let mut prompt = format!(
        "Write a {interpreter} script implementing a tool for the following task:\n{task}\n\
         If possible, create a generic tool that is also reusable with other parameters.\n\n\
         The script must start with a comment header declaring the tool:\n\
         # tool: <snake_case_name>\n\
         # description: <what the tool does>\n\
         # param <name>: <string|integer|number|boolean|array|object>[, optional] - <description>\n\
         Arguments are passed as environment variables TOOL_ARG_<NAME> (upper-case) and as a JSON object on stdin.\n\
         Print only the result to stdout and exit with status 0 on success.\n\
         Reply with the script only.\n"
    );
    if let Some(feedback) = feedback {
        prompt.push_str(&format!(
            "\nThe previous attempt was rejected:\n{feedback}\nFix the problem.\n"
        ));
    }
    prompt
}

pub fn tool_update_prompt(source: &str, instruction: &str, interpreter: &str) -> String {
    format!(
        "Update the following {interpreter} script according to the instruction below.\n\
         Keep the comment header format and the tool name unchanged; adjust the description and parameters if needed.\n\n\
         Script:\n{source}\n\n\
         Instruction:\n{instruction}\n\n\
         Reply with the complete updated script only.\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_previous() {
        assert_eq!(format_previous(&[]), "[]");
        let prev = vec![
            ("Add 1 and 2".to_string(), "3".to_string()),
            ("Double it".to_string(), "6".to_string()),
        ];
        assert_eq!(format_previous(&prev), "1. Add 1 and 2: 3\n2. Double it: 6");
    }

    #[test]
    fn test_replan_prompt_lists_failed_plans() {
        let prompt = decomposition_prompt(
            "task",
            &["add".to_string()],
            &[],
            &[vec!["a".to_string(), "b".to_string()]],
            "{}",
        );
        assert!(prompt.contains("following decompositions failed"));
        assert!(prompt.contains("a, b"));
        let fresh = decomposition_prompt("task", &[], &[], &[], "{}");
        assert!(!fresh.contains("failed"));
    }

    #[test]
    fn test_tool_create_prompt_feedback() {
        let p = tool_create_prompt("sum", "sh", Some("syntax error"));
        assert!(p.contains("sh script"));
        assert!(p.contains("syntax error"));
    }

    #[test]
    fn test_update_prompt_carries_source_and_instruction() {
        let prompt = tool_update_prompt("# tool: square\necho 1", "Also accept negative numbers.", "sh");
        assert!(prompt.contains("# tool: square"));
        assert!(prompt.contains("Also accept negative numbers."));
        assert!(prompt.contains("tool name unchanged"));
    }
}
