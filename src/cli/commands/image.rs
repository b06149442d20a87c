// Image verbs: images, inspecti, pull, rmi

use std::collections::HashSet;
use std::path::PathBuf;

use clap::Args;
use serde_json::{json, Value};

use super::common::{emit, emit_line, format_size, resolve_image, truncate_id};
use super::config_file::load_config_file;
use super::info::expand_info;
use crate::cli::{OutputArgs, Session};
use crate::cri::{AuthConfig, Image, ImageFilter, ImageSpec, ListImagesResponse, PodSandboxConfig};
use crate::errors::{CliError, CliResult};
use crate::output::table::{IMAGE_COLUMNS, IMAGE_DIGEST_COLUMNS};
use crate::output::{render, OutputFormat, Table};

#[derive(Args, Debug, Clone, Default)]
pub struct ImagesArgs {
    /// Only list images of this repository
    pub repository: Option<String>,

    /// Show digests
    #[clap(long)]
    pub digests: bool,

    /// Do not truncate ids
    #[clap(long)]
    pub no_trunc: bool,

    /// Print only image ids
    #[clap(short = 'q', long)]
    pub quiet: bool,

    #[clap(flatten)]
    pub output: OutputArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct PullArgs {
    pub image: String,

    /// Registry credentials as USERNAME:PASSWORD
    #[clap(long)]
    pub creds: Option<String>,

    /// Base64 encoded registry auth
    #[clap(long)]
    pub auth: Option<String>,

    /// Pod sandbox config the image is pulled for
    #[clap(short = 'p', long)]
    pub pod_config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RmiArgs {
    pub images: Vec<String>,

    /// Remove every image
    #[clap(short = 'a', long)]
    pub all: bool,

    /// Remove images not used by any container
    #[clap(short = 'q', long)]
    pub prune: bool,
}

/// Split `registry/repo:tag` into repository and tag.
pub fn split_repo_tag(repo_tag: &str) -> (String, String) {
    let name_start = repo_tag.rfind('/').map(|i| i + 1).unwrap_or(0);
    match repo_tag[name_start..].rfind(':') {
        Some(i) => (
            repo_tag[..name_start + i].to_string(),
            repo_tag[name_start + i + 1..].to_string(),
        ),
        None => (repo_tag.to_string(), "latest".to_string()),
    }
}

fn digest_of(image: &Image, repo: &str, no_trunc: bool) -> String {
    image
        .repo_digests
        .iter()
        .find(|d| d.starts_with(&format!("{repo}@")) || image.repo_tags.is_empty())
        .or_else(|| image.repo_digests.first())
        .and_then(|d| d.split_once('@').map(|(_, digest)| truncate_id(digest, no_trunc)))
        .unwrap_or_else(|| "<none>".to_string())
}

fn images_table(images: &[Image], digests: bool, no_trunc: bool) -> Table {
    let columns = if digests { IMAGE_DIGEST_COLUMNS } else { IMAGE_COLUMNS };
    let mut table = Table::new(columns);
    for image in images {
        let id = truncate_id(&image.id, no_trunc);
        let size = format_size(image.size);

        let mut tags: Vec<(String, String)> = image.repo_tags.iter().map(|t| split_repo_tag(t)).collect();
        if tags.is_empty() {
            let repo = image
                .repo_digests
                .first()
                .and_then(|d| d.split_once('@').map(|(repo, _)| repo.to_string()))
                .unwrap_or_else(|| "<none>".to_string());
            tags.push((repo, "<none>".to_string()));
        }

        for (repo, tag) in tags {
            let mut row = vec![repo.clone(), tag];
            if digests {
                row.push(digest_of(image, &repo, no_trunc));
            }
            row.push(id.clone());
            row.push(size.clone());
            table.push(row);
        }
    }
    table
}

/// List images.
pub async fn handle_images(session: &Session, args: &ImagesArgs) -> CliResult<u8> {
    let format = OutputFormat::from_flags(
        args.output.output.as_deref(),
        args.output.template.as_deref(),
        "table",
        true,
    )?;

    let client = session.client().await?;
    let filter = args.repository.as_ref().map(|repo| ImageFilter {
        image: Some(ImageSpec {
            image: repo.clone(),
            ..Default::default()
        }),
    });
    let mut images = client.list_images(filter).await?;
    images.sort_by(|a, b| a.repo_tags.first().cmp(&b.repo_tags.first()).then_with(|| a.id.cmp(&b.id)));

    if args.quiet {
        for image in &images {
            emit_line(&image.id)?;
        }
        return Ok(0);
    }

    let response = ListImagesResponse { images };
    let text = render(&response, &format, || {
        Ok(images_table(&response.images, args.digests, args.no_trunc))
    })?;
    emit(&text)?;
    Ok(0)
}

/// Show the status of one or more images.
pub async fn handle_inspecti(session: &Session, images: &[String], output: &OutputArgs) -> CliResult<u8> {
    let format = OutputFormat::from_flags(
        output.output.as_deref(),
        output.template.as_deref(),
        "json",
        true,
    )?;

    let client = session.client().await?;
    for reference in images {
        let image = resolve_image(client, reference).await?;
        let response = client.image_status(&image.id, true).await?;
        let status = response.image.unwrap_or(image);
        let document = json!({
            "status": status,
            "info": Value::Object(expand_info(&response.info)),
        });
        let text = render(&document, &format, || {
            Ok(images_table(std::slice::from_ref(&status), true, true))
        })?;
        emit(&text)?;
    }
    Ok(0)
}

fn auth_config(args: &PullArgs) -> CliResult<Option<AuthConfig>> {
    if args.creds.is_some() && args.auth.is_some() {
        return Err(CliError::FlagConflict(
            "both --creds and --auth were given".into(),
        ));
    }
    if let Some(creds) = &args.creds {
        return match creds.split_once(':') {
            Some((username, password)) if !username.is_empty() => Ok(Some(AuthConfig {
                username: username.to_string(),
                password: password.to_string(),
                ..Default::default()
            })),
            _ => Err(CliError::InvalidArgument(
                "--creds must be USERNAME:PASSWORD".into(),
            )),
        };
    }
    Ok(args.auth.as_ref().map(|auth| AuthConfig {
        auth: auth.clone(),
        ..Default::default()
    }))
}

/// Pull an image and print the resolved reference.
pub async fn handle_pull(session: &Session, args: &PullArgs) -> CliResult<u8> {
    let auth = auth_config(args)?;
    let sandbox_config = args
        .pod_config
        .as_deref()
        .map(load_config_file::<PodSandboxConfig>)
        .transpose()?;

    let client = session.client().await?;
    let image_ref = client.pull_image(&args.image, auth, sandbox_config).await?;
    emit_line(&format!("Image is up to date for {image_ref}"))?;
    Ok(0)
}

/// Remove images by reference or id prefix, or all/unused ones.
pub async fn handle_rmi(session: &Session, args: &RmiArgs) -> CliResult<u8> {
    if args.images.is_empty() && !args.all && !args.prune {
        return Err(CliError::InvalidArgument("no image specified".into()));
    }

    let client = session.client().await?;
    let targets: Vec<Image> = if args.all || args.prune {
        let images = client.list_images(None).await?;
        if args.prune {
            let in_use: HashSet<String> = client
                .list_containers(None)
                .await?
                .into_iter()
                .flat_map(|c| {
                    let spec = c.image.map(|s| s.image).unwrap_or_default();
                    [c.image_ref, spec]
                })
                .collect();
            images
                .into_iter()
                .filter(|image| {
                    !in_use.contains(&image.id)
                        && !image.repo_tags.iter().any(|t| in_use.contains(t))
                        && !image.repo_digests.iter().any(|d| in_use.contains(d))
                })
                .collect()
        } else {
            images
        }
    } else {
        let mut picked = Vec::new();
        for reference in &args.images {
            picked.push(resolve_image(client, reference).await?);
        }
        picked
    };

    for image in targets {
        client.remove_image(&image.id).await?;
        if image.repo_tags.is_empty() {
            emit_line(&format!("Deleted: {}", image.id))?;
        }
        for tag in &image.repo_tags {
            emit_line(&format!("Deleted: {tag}"))?;
        }
    }
    Ok(0)
}
