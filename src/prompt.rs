//! Prompt strategies: pure functions from a gathered context to prompt text.

use crate::model::QuestionType;

/// Everything a strategy may use to build its prompt. Built once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptContext {
    /// Framed text blocks in extraction order.
    pub resource_contents: Vec<String>,
    /// Indicator tags the generated output may refer to.
    pub existing_indicators: Vec<String>,
    /// Framed indicator resource, kept apart from the study material.
    pub indicator_text: Option<String>,
}

pub trait PromptStrategy: Send + Sync {
    fn render(&self, ctx: &PromptContext) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QuestionPromptStrategy;

#[derive(Debug, Clone, Copy, Default)]
pub struct OverviewPromptStrategy;

const MATERIAL_OPEN: &str = "<<<STUDY MATERIAL>>>";
const MATERIAL_CLOSE: &str = "<<<END STUDY MATERIAL>>>";
const INDICATOR_OPEN: &str = "<<<LEARNING INDICATORS>>>";
const INDICATOR_CLOSE: &str = "<<<END LEARNING INDICATORS>>>";

fn push_material(out: &mut String, ctx: &PromptContext) {
    out.push_str(MATERIAL_OPEN);
    out.push('\n');
    for block in &ctx.resource_contents {
        out.push_str(block);
        if !block.ends_with('\n') {
            out.push('\n');
        }
    }
    out.push_str(MATERIAL_CLOSE);
    out.push_str("\n\n");
}

fn push_indicator(out: &mut String, ctx: &PromptContext) {
    if let Some(text) = ctx.indicator_text.as_deref() {
        out.push_str(INDICATOR_OPEN);
        out.push('\n');
        out.push_str(text.trim_end());
        out.push('\n');
        out.push_str(INDICATOR_CLOSE);
        out.push_str("\n\n");
    }
}

fn tag_list(ctx: &PromptContext) -> String {
    ctx.existing_indicators
        .iter()
        .map(|t| format!("- {}", t))
        .collect::<Vec<_>>()
        .join("\n")
}

impl PromptStrategy for QuestionPromptStrategy {
    fn render(&self, ctx: &PromptContext) -> String {
        let mut out = String::new();
        out.push_str(
            "Write quiz questions that check understanding of the study material below.\n\
             Cover every file. Mix the question types where the material allows it.\n\n",
        );
        push_material(&mut out, ctx);
        push_indicator(&mut out, ctx);

        out.push_str("Tag each question with one or more of these indicator tags, spelled exactly as listed:\n");
        out.push_str(&tag_list(ctx));
        out.push_str("\n\n");

        let types = QuestionType::all()
            .iter()
            .map(|t| format!("\"{}\"", t.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str("Answer with a JSON array and nothing else. Each element is an object with:\n");
        out.push_str(&format!("- \"type\": one of {}\n", types));
        out.push_str(
            "- \"question\": the question text\n\
             - \"expectedAnswer\": the correct answer\n\
             - \"answers\": array of candidate answers (empty unless MULTIPLE_CHOICE)\n\
             - \"tags\": array of indicator tags taken from the list above\n",
        );
        out
    }
}

impl PromptStrategy for OverviewPromptStrategy {
    fn render(&self, ctx: &PromptContext) -> String {
        let mut out = String::new();
        out.push_str(
            "Write a study overview of the material below as one markdown document.\n\
             Start with a level-1 title, use headings per topic, bullet lists for key facts \
             and fenced code blocks only for code or formulas.\n\n",
        );
        push_material(&mut out, ctx);
        push_indicator(&mut out, ctx);

        out.push_str("Give each of these indicator topics its own section:\n");
        out.push_str(&tag_list(ctx));
        out.push_str("\n\nReturn only the markdown document.\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> PromptContext {
        PromptContext {
            resource_contents: vec![
                "=== FILE: a.txt ===\nalpha\n\n".into(),
                "=== FILE: b.txt (FAILED TO PARSE) ===\n\n".into(),
                "=== FILE: c.txt ===\ngamma\n\n".into(),
            ],
            existing_indicators: vec!["mitosis".into(), "meiosis".into()],
            indicator_text: None,
        }
    }

    #[test]
    fn question_prompt_includes_blocks_in_order_and_all_tags() {
        let prompt = QuestionPromptStrategy.render(&ctx());
        let a = prompt.find("a.txt").unwrap();
        let b = prompt.find("b.txt").unwrap();
        let c = prompt.find("c.txt").unwrap();
        assert!(a < b && b < c);
        assert!(prompt.contains("- mitosis\n- meiosis"));
        assert!(prompt.contains("\"expectedAnswer\""));
        assert!(!prompt.contains(INDICATOR_OPEN));
    }

    #[test]
    fn overview_prompt_is_deterministic() {
        let c = ctx();
        assert_eq!(OverviewPromptStrategy.render(&c), OverviewPromptStrategy.render(&c));
        assert!(OverviewPromptStrategy.render(&c).contains("gamma"));
    }

    #[test]
    fn indicator_text_gets_its_own_section() {
        let mut c = ctx();
        c.indicator_text = Some("=== FILE: goals.txt ===\nknow the cell cycle\n\n".into());
        let prompt = QuestionPromptStrategy.render(&c);
        let material_end = prompt.find(MATERIAL_CLOSE).unwrap();
        let indicator_start = prompt.find(INDICATOR_OPEN).unwrap();
        assert!(material_end < indicator_start);
        assert!(prompt[indicator_start..].contains("know the cell cycle"));
    }
}
