use clap::Parser;
use tablekit_cli::{run, Cli};
use tablekit_db::{DbConfig, QueryHelper, Statement};

async fn helper_with_table(path: &std::path::Path) -> QueryHelper {
    let config = DbConfig::sqlite(format!("{}?mode=rwc", path.display()));
    let mut helper = QueryHelper::connect(&config).await.unwrap();
    helper
        .execute_statement(&Statement::new(
            "CREATE TABLE notes (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT, pinned INTEGER)",
            vec![],
        ))
        .await
        .unwrap();
    helper
}

async fn exec(helper: &mut QueryHelper, args: &[&str]) -> String {
    let cli = Cli::try_parse_from(std::iter::once("tablekit").chain(args.iter().copied())).unwrap();
    let mut out = Vec::new();
    run(helper, cli.command, &mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

#[tokio::test]
async fn crud_through_commands() {
    let dir = tempfile::tempdir().unwrap();
    let mut helper = helper_with_table(&dir.path().join("notes.db")).await;

    assert_eq!(exec(&mut helper, &["exists", "notes"]).await, "true\n");
    assert_eq!(exec(&mut helper, &["exists", "nothing"]).await, "false\n");

    let out = exec(
        &mut helper,
        &["insert", "notes", "-s", "body=hello world", "-s", "pinned=1", "--id"],
    )
    .await;
    assert_eq!(out, "{\"affected\":1,\"id\":1}\n");

    exec(&mut helper, &["insert", "notes", "-s", "body=second", "-s", "pinned=0"]).await;
    assert_eq!(exec(&mut helper, &["count", "notes"]).await, "2\n");
    assert_eq!(exec(&mut helper, &["count", "notes", "-w", "pinned=1"]).await, "1\n");

    let out = exec(&mut helper, &["find", "notes", "-w", "id=2"]).await;
    assert_eq!(out, "{\"id\":2,\"body\":\"second\",\"pinned\":0}\n");

    let out = exec(
        &mut helper,
        &["update", "notes", "-s", "pinned=1", "-w", "body=second"],
    )
    .await;
    assert_eq!(out, "{\"affected\":1}\n");

    let out = exec(&mut helper, &["get", "notes", "body", "-w", "id=1"]).await;
    assert_eq!(out, "{\"body\":\"hello world\"}\n");
    let out = exec(&mut helper, &["get", "notes", "body", "-w", "id=99"]).await;
    assert_eq!(out, "null\n");

    let out = exec(&mut helper, &["delete", "notes", "-w", "pinned=1"]).await;
    assert_eq!(out, "{\"affected\":2}\n");
    assert_eq!(exec(&mut helper, &["count", "notes"]).await, "0\n");

    helper.close().await.unwrap();
}
