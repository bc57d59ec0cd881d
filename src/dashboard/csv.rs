use super::model::ChecklistGroup;

const HEADER: &str = "checklist,id,text,done";

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// One row per checklist item. Every field is quoted.
pub fn checklists_csv(groups: &[ChecklistGroup]) -> String {
    let mut out = String::from(HEADER);
    out.push('\n');

    for group in groups {
        for item in &group.items {
            let row = [
                quote(&group.title),
                quote(&item.id),
                quote(&item.text),
                quote(if item.done { "true" } else { "false" }),
            ];
            out.push_str(&row.join(","));
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::model::ChecklistItem;

    #[test]
    fn quotes_are_doubled() {
        let groups = vec![ChecklistGroup {
            id: "setup".to_string(),
            title: "Setup".to_string(),
            items: vec![ChecklistItem {
                id: "bio".to_string(),
                text: r#"Write the "hook", then the CTA"#.to_string(),
                done: true,
                actions: Vec::new(),
            }],
        }];

        let csv = checklists_csv(&groups);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "checklist,id,text,done");
        assert_eq!(
            lines[1],
            r#""Setup","bio","Write the ""hook"", then the CTA","true""#
        );
    }
}
