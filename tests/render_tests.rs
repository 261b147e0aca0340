//! Containerfile rendering tests.

mod helpers;

use bootseq::render::{self, CONTAINERFILE, IGNOREFILE};
use bootseq::{LayerOrder, Plan, Recipe};
use regex::Regex;
use std::fs;

fn instructions(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| !line.is_empty() && !line.starts_with(' '))
        .map(|line| line.split_whitespace().next().unwrap_or_default().to_string())
        .collect()
}

#[test]
fn test_instruction_sequence() {
    let plan = Plan::from_recipe(&Recipe::default()).unwrap();
    let text = render::render_containerfile(&plan);
    assert_eq!(
        instructions(&text),
        vec!["FROM", "COPY", "WORKDIR", "COPY", "RUN", "COPY", "RUN", "USER", "CMD"]
    );
}

#[test]
fn test_exactly_one_from_and_user_before_cmd() {
    let plan = Plan::from_recipe(&Recipe::default()).unwrap();
    let text = render::render_containerfile(&plan);

    let from = Regex::new(r"(?m)^FROM ").unwrap();
    assert_eq!(from.find_iter(&text).count(), 1);

    let tail = Regex::new(r"(?s)USER 1000:1000\n\nCMD \[[^\n]*\]\n$").unwrap();
    assert!(tail.is_match(&text), "unexpected tail:\n{}", text);
}

#[test]
fn test_identity_step_creates_and_chowns() {
    let plan = Plan::from_recipe(&Recipe::default()).unwrap();
    let text = render::render_containerfile(&plan);
    let identity = Regex::new(
        r"RUN groupadd --gid 1000 appuser \\\n\s+&& useradd --uid 1000 --gid 1000 .*appuser \\\n\s+&& chown -R 1000:1000 /app",
    )
    .unwrap();
    assert!(identity.is_match(&text), "identity step missing:\n{}", text);
}

#[test]
fn test_tool_is_placed_before_install_and_used_by_cmd() {
    let plan = Plan::from_recipe(&Recipe::default()).unwrap();
    let text = render::render_containerfile(&plan);

    let place = text.find("COPY --from=ghcr.io/astral-sh/uv:latest /uv /bin/uv").unwrap();
    let install = text.find("RUN /bin/uv sync --locked --no-dev").unwrap();
    assert!(place < install);
    assert!(text.contains(r#"CMD ["/bin/uv","run","bot.py"]"#));
}

#[test]
fn test_source_first_copies_tree_before_install() {
    let mut recipe = Recipe::default();
    recipe.layout.order = LayerOrder::SourceFirst;
    let plan = Plan::from_recipe(&recipe).unwrap();
    let text = render::render_containerfile(&plan);

    assert!(!text.contains("COPY pyproject.toml uv.lock ./"));
    assert!(text.find("COPY . .").unwrap() < text.find("RUN /bin/uv sync").unwrap());
}

#[test]
fn test_write_all_into_project() {
    let env = helpers::TestEnv::new();
    let recipe = Recipe::default();
    let plan = Plan::from_recipe(&recipe).unwrap();

    render::write_all(&plan, &recipe, &env.project).unwrap();
    let containerfile = fs::read_to_string(env.project.join(CONTAINERFILE)).unwrap();
    let ignore = fs::read_to_string(env.project.join(IGNOREFILE)).unwrap();

    assert!(containerfile.starts_with("FROM python:3.12-slim\n"));
    let lines: Vec<&str> = ignore.lines().collect();
    assert!(lines.contains(&".git"));
    assert!(lines.contains(&"**/__pycache__"));
    assert!(lines.contains(&".env"));
    let declarations: Vec<&&str> = lines
        .iter()
        .filter(|l| l.contains("uv.lock") || l.contains("pyproject"))
        .collect();
    assert_eq!(declarations, vec![&"!pyproject.toml", &"!uv.lock"]);
}
