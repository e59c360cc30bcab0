//! Instruction text for the two output grammars the extractor understands.
//!
//! The compact variant targets streaming backends and asks for one JSON
//! object per line so records can be surfaced as soon as each line closes.
//! The labeled variant targets non-streaming (on-device) models, which
//! handle plain labeled blocks more reliably than strict JSON.

/// Stop sequences callers must pass alongside the labeled prompt to bound
/// generation length on completion-style models.
pub const LABELED_STOP_MARKERS: [&str; 2] = ["END_OF_QUESTIONS", "\n\n\n\n"];

/// Prompt for the compact line-delimited JSON grammar.
pub fn compact_prompt(target_count: u32) -> String {
    format!(
        "Create exactly {target_count} multiple-choice questions from the study material below.\n\
         Output one standalone JSON object per line, each shaped exactly:\n\
         {{\"q\":\"question text\",\"o\":[\"option A\",\"option B\",\"option C\",\"option D\"],\"a\":0}}\n\
         where \"a\" is the index (0-3) of the correct option.\n\
         Do NOT wrap the objects in an array. Do NOT number the lines. Do NOT add commentary,\n\
         markdown fences, or blank lines between objects.\n\
         Questions must be self-contained: never refer to \"the text\", \"the passage\",\n\
         or \"the material\".\n\
         Study material follows."
    )
}

/// Prompt for the labeled Q/A/B/C/D/Answer block grammar.
pub fn labeled_prompt(target_count: u32) -> String {
    format!(
        "Write {target_count} multiple-choice questions about the study material below.\n\
         Use exactly this layout for each question, numbered Q1 through Q{target_count}:\n\
         Q1: question text\n\
         A: first option\n\
         B: second option\n\
         C: third option\n\
         D: fourth option\n\
         Answer: C\n\
         \n\
         Every question needs all four options and one Answer line with a single letter A-D.\n\
         After the last question write {}.\n\
         Study material follows.",
        LABELED_STOP_MARKERS[0]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_prompt_names_the_count() {
        let p = compact_prompt(7);
        assert!(p.contains("exactly 7"));
        assert!(p.contains("one standalone JSON object per line"));
    }

    #[test]
    fn labeled_prompt_carries_stop_marker() {
        let p = labeled_prompt(3);
        assert!(p.contains("Q1 through Q3"));
        assert!(p.contains(LABELED_STOP_MARKERS[0]));
    }
}
