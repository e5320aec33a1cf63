use colored::Colorize;
use kabuild_build::{Removal, Stage, Teardown};

pub async fn handle(job: &str, artifact: Option<&str>) -> anyhow::Result<()> {
    let (config, cluster) = super::connect().await?;

    let report = Teardown::new(&cluster, &config.namespace)
        .run(Some(job), artifact)
        .await
        .map_err(|e| e.in_stage(Stage::Cleanup))?;

    print_removal("Pod", job, report.job);
    if let Some(name) = artifact {
        print_removal("ConfigMap", name, report.artifact);
    }

    Ok(())
}

fn print_removal(kind: &str, name: &str, removal: Removal) {
    match removal {
        Removal::Deleted => println!("{} {} {} を削除しました", "✓".green(), kind, name.cyan()),
        Removal::AlreadyGone => println!(
            "{} {} {} は既に存在しません",
            "-".dimmed(),
            kind,
            name.cyan()
        ),
        Removal::Skipped => {}
    }
}
