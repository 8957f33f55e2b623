use regex::Regex;

/// A project/task pair extracted from an Asana URL in free text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskReference {
    pub project_id: String,
    pub task_id: String,
}

/// Scan `body` for Asana task URLs preceded by `trigger_phrase` and return
/// the referenced tasks in order of appearance. An empty trigger phrase
/// matches bare URLs anywhere in the body. With `project_filter` set,
/// references to other projects are skipped (logged, scan continues).
///
/// Both URL shapes are recognized: the classic
/// `https://app.asana.com/0/<project>/<task>` and the newer
/// `https://app.asana.com/<n>/.../project/<project>/task/<task>`.
pub fn find_task_references(
    body: &str,
    trigger_phrase: &str,
    project_filter: Option<&str>,
) -> Vec<TaskReference> {
    let prefix = if trigger_phrase.is_empty() {
        String::new()
    } else {
        format!(r"{}\s+", regex::escape(trigger_phrase))
    };
    let pattern = format!(
        r"{prefix}https://app\.asana\.com/(\d+)/(?:\d+/)*?(?:project/)?(?P<project>\d+)(?:/task)?/(?P<task>\d+)"
    );
    // The trigger phrase is escaped, so the pattern always compiles.
    let re = Regex::new(&pattern).expect("regex build error");

    let mut found = Vec::new();
    for caps in re.captures_iter(body) {
        let Some(task) = caps.name("task") else {
            eprintln!("invalid Asana task URL after trigger-phrase {trigger_phrase}");
            continue;
        };
        let project = caps
            .name("project")
            .map(|m| m.as_str())
            .unwrap_or_default();
        if let Some(filter) = project_filter {
            if filter != project {
                println!(
                    " ... skipping {} as it is not in project {filter}",
                    task.as_str()
                );
                continue;
            }
        }
        found.push(TaskReference {
            project_id: project.to_string(),
            task_id: task.as_str().to_string(),
        });
    }
    println!(
        "found {} task ids: {}",
        found.len(),
        found
            .iter()
            .map(|r| r.task_id.as_str())
            .collect::<Vec<_>>()
            .join(",")
    );
    found
}
