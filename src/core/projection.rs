//! Projection of stored turns into backend contents

use super::attachments::Attachment;
use super::errors::CoreError;
use super::types::Turn;
use crate::llm::{Content, Part, Role};

/// Parts for one user or model message
///
/// Each attachment contributes its preface followed by its data; the text
/// comes last and only when non-empty.
pub fn turn_parts(text: &str, attachments: &[Attachment]) -> Result<Vec<Part>, CoreError> {
    let mut parts = Vec::with_capacity(attachments.len() * 2 + 1);
    for attachment in attachments {
        parts.push(Part::Text(attachment.preface()));
        parts.push(Part::InlineData(attachment.encode()?));
    }
    if !text.is_empty() {
        parts.push(Part::text(text));
    }
    Ok(parts)
}

/// Project stored turns into the ordered content list
///
/// Turns that produce no parts are left out.
pub fn project(turns: &[Turn]) -> Result<Vec<Content>, CoreError> {
    let mut contents = Vec::with_capacity(turns.len());
    for turn in turns {
        let parts = match turn.role {
            Role::User => turn_parts(&turn.text, &turn.attachments)?,
            // Model attachments are generated images; only the text goes back
            Role::Model => turn_parts(&turn.text, &[])?,
        };
        if !parts.is_empty() {
            contents.push(Content::new(turn.role, parts));
        }
    }
    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn image(name: &str) -> Attachment {
        Attachment::from_bytes(name, "image/png", b"img")
    }

    #[test]
    fn test_user_turn_with_attachments_interleaves() {
        let mut described = image("b.png");
        described.description = Some("Back".to_string());
        let turns = vec![Turn::user("compare", vec![image("a.png"), described])];

        let contents = project(&turns).unwrap();
        assert_eq!(contents.len(), 1);
        let parts = &contents[0].parts;
        assert_eq!(parts.len(), 5);
        assert_eq!(
            parts[0].as_text(),
            Some("This is the file with the original filename \"a.png\".")
        );
        assert!(parts[1].is_inline_data());
        assert_eq!(
            parts[2].as_text(),
            Some("This file, which I've named \"Back\", has the original filename \"b.png\".")
        );
        assert!(parts[3].is_inline_data());
        assert_eq!(parts[4].as_text(), Some("compare"));
    }

    #[test]
    fn test_empty_turns_are_omitted() {
        let turns = vec![
            Turn::user("hi", vec![]),
            Turn::model(""),
            Turn::user("again", vec![]),
        ];
        let contents = project(&turns).unwrap();
        assert_eq!(contents.len(), 2);
        assert!(contents.iter().all(|c| c.role == Role::User));
    }

    #[test]
    fn test_attachment_without_text_has_no_text_part() {
        let contents = project(&[Turn::user("", vec![image("a.png")])]).unwrap();
        assert_eq!(contents[0].parts.len(), 2);
    }

    #[test]
    fn test_model_image_turn_projects_text_only() {
        let turn = Turn::model_with_image("Here it is", image("generated-1.png"));
        let contents = project(&[turn]).unwrap();
        assert_eq!(contents[0].role, Role::Model);
        assert_eq!(contents[0].parts, vec![Part::text("Here it is")]);

        let turn = Turn::model_with_image("", image("generated-2.png"));
        assert!(project(&[turn]).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_attachment_fails_projection() {
        let mut broken = image("a.png");
        broken.data = "garbage".to_string();
        let result = project(&[Turn::user("x", vec![broken])]);
        assert!(matches!(result, Err(CoreError::MalformedAttachment(_))));
    }

    proptest! {
        #[test]
        fn prop_part_count(text in ".{0,40}", n in 0usize..5) {
            let attachments: Vec<_> = (0..n).map(|i| image(&format!("{i}.png"))).collect();
            let parts = turn_parts(&text, &attachments).unwrap();
            let expected = 2 * n + usize::from(!text.is_empty());
            prop_assert_eq!(parts.len(), expected);
            for pair in parts.chunks(2).take(n) {
                prop_assert!(pair[0].as_text().is_some());
                prop_assert!(pair[1].is_inline_data());
            }
        }

        #[test]
        fn prop_projection_is_pure(texts in proptest::collection::vec(".{0,20}", 0..6)) {
            let turns: Vec<Turn> = texts
                .iter()
                .enumerate()
                .map(|(i, t)| if i % 2 == 0 { Turn::user(t.clone(), vec![]) } else { Turn::model(t.clone()) })
                .collect();
            let first = project(&turns).unwrap();
            let second = project(&turns).unwrap();
            prop_assert_eq!(&first, &second);
            prop_assert!(first.iter().all(|c| c.parts.len() == 1));
        }
    }
}
