use std::path::PathBuf;

use logbook_core::RecordFields;

use crate::commands::common::{
    parse_attributes, parse_logged_at, resolve_entry_text, sync_after_mutation, Workspace,
};
use crate::error::CliError;

pub struct AddArgs {
    pub text: Vec<String>,
    pub category: Option<String>,
    pub at: Option<String>,
    pub attributes: Vec<String>,
    pub photo: Option<PathBuf>,
}

pub async fn run_add(args: AddArgs, workspace: &Workspace, offline: bool) -> Result<(), CliError> {
    let text = resolve_entry_text(&args.text)?;
    let mut fields = RecordFields::new(text);
    if let Some(at) = args.at.as_deref() {
        fields = fields.logged_at(parse_logged_at(at)?);
    }
    if let Some(category) = args.category.as_deref().map(str::trim) {
        if !category.is_empty() {
            fields = fields.category(category);
        }
    }
    fields.attributes = parse_attributes(&args.attributes)?;
    let photo = args.photo.map(std::fs::read).transpose()?;

    let store = workspace.open_store()?;
    let attachments = workspace.open_attachments()?;
    let record = store.create(fields).await?;
    if let Some(bytes) = photo {
        store.attach(&attachments, &record.local_id, bytes).await?;
    }

    println!("{}", record.local_id);
    sync_after_mutation(workspace, &store, &attachments, offline).await;
    Ok(())
}
