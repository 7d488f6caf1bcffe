use crate::commands::common::{
    capture_editor_input_with_initial, normalize_content, resolve_record, sync_after_mutation,
    Workspace,
};
use crate::error::CliError;

pub async fn run_edit(
    id: &str,
    text_parts: &[String],
    category: Option<&str>,
    workspace: &Workspace,
    offline: bool,
) -> Result<(), CliError> {
    let store = workspace.open_store()?;
    let record = resolve_record(id, &store)?;

    let text = match normalize_content(&text_parts.join(" ")) {
        Some(text) => text,
        None => capture_editor_input_with_initial(&record.fields.text)?
            .ok_or(CliError::EmptyEditedContent)?,
    };

    let mut fields = record.fields.clone();
    fields.text = text;
    if let Some(category) = category.map(str::trim) {
        fields.category = (!category.is_empty()).then(|| category.to_string());
    }

    if fields == record.fields {
        println!("{}", record.local_id);
        return Ok(());
    }

    let updated = store.update(&record.local_id, fields).await?;
    println!("{}", updated.local_id);

    let attachments = workspace.open_attachments()?;
    sync_after_mutation(workspace, &store, &attachments, offline).await;
    Ok(())
}
