//! Workspaces: named collections of recordings and sortings, recorded as actions in a feed.
//!
//! Importing a recording (or a sorting) stores its content in the content store and appends an
//! action to the workspace subfeed of the feed. The current state of a workspace is obtained by
//! replaying its actions.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::recording::{Recording, RecordingObject};
use crate::core::sorting::{Sorting, SortingObject};
use crate::error::EphysError;
use crate::feed::Feed;
use crate::storage::content::ContentStore;

/// The name of the subfeed holding the actions of a workspace.
pub fn workspace_subfeed(workspace_name: &str) -> String {
    format!("workspace-{}", workspace_name)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingEntry {
    pub recording_id: String,
    pub recording_label: String,
    /// URI of the stored recording object.
    pub recording_path: String,
    pub recording_object: RecordingObject,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortingEntry {
    pub sorting_id: String,
    pub sorting_label: String,
    /// URI of the stored sorting object.
    pub sorting_path: String,
    pub sorting_object: SortingObject,
    pub recording_id: String,
    pub recording_path: String,
    pub recording_object: RecordingObject,
}

/// An action on a workspace, as appended to its subfeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceAction {
    AddRecording {
        recording: RecordingEntry,
    },
    AddSorting {
        sorting: SortingEntry,
    },
    DeleteRecordings {
        #[serde(rename = "recordingIds")]
        recording_ids: Vec<String>,
    },
    DeleteSortings {
        #[serde(rename = "sortingIds")]
        sorting_ids: Vec<String>,
    },
}

/// Append an action to the workspace subfeed.
pub fn append_action(feed: &Feed, workspace_name: &str, action: &WorkspaceAction) -> Result<(), EphysError> {
    let mut message = serde_json::Map::new();
    message.insert("action".to_string(), serde_json::to_value(action)?);
    feed.append_message(&workspace_subfeed(workspace_name), &message.into())?;
    Ok(())
}

/// Store a recording and register it in the workspace under `recording_id`.
pub fn import_recording(
    feed: &Feed,
    store: &ContentStore,
    workspace_name: &str,
    recording: &Recording,
    recording_id: &str,
) -> Result<RecordingEntry, EphysError> {
    let recording_object = recording.save(store)?;
    let recording_path = store.store_json(&recording_object, &format!("{}.json", recording_id))?;
    let entry = RecordingEntry {
        recording_id: recording_id.to_string(),
        recording_label: recording_id.to_string(),
        recording_path,
        recording_object,
        description: format!(
            "{} channels, {:.1} s at {} Hz",
            recording.num_channels(),
            recording.duration(),
            recording.sampling_frequency()
        ),
    };
    append_action(
        feed,
        workspace_name,
        &WorkspaceAction::AddRecording {
            recording: entry.clone(),
        },
    )?;
    log::info!(
        "Imported recording {} into workspace {:?} of {}",
        recording_id,
        workspace_name,
        feed.uri()
    );
    Ok(entry)
}

/// Store a sorting of a recording and register it in the workspace under `sorting_id`.
/// The function returns an error if the sorting does not match the recording.
pub fn import_sorting(
    feed: &Feed,
    store: &ContentStore,
    workspace_name: &str,
    recording: &Recording,
    sorting: &Sorting,
    recording_id: &str,
    sorting_id: &str,
) -> Result<SortingEntry, EphysError> {
    if (recording.sampling_frequency() - sorting.sampling_frequency()).abs()
        > 1e-6 * recording.sampling_frequency()
    {
        return Err(EphysError::InvalidParameter(format!(
            "sorting {} and recording {} have different sampling frequencies",
            sorting_id, recording_id
        )));
    }
    let num_frames = recording.num_frames() as u64;
    if let Some((unit_id, _)) = sorting
        .iter()
        .find(|(_, frames)| frames.last().is_some_and(|&f| f >= num_frames))
    {
        return Err(EphysError::InvalidSpikeTrain(format!(
            "unit {} of sorting {} fires after the end of recording {}",
            unit_id, sorting_id, recording_id
        )));
    }

    let recording_object = recording.save(store)?;
    let recording_path = store.store_json(&recording_object, &format!("{}.json", recording_id))?;
    let sorting_object = sorting.save(store)?;
    let sorting_path = store.store_json(&sorting_object, &format!("{}.json", sorting_id))?;
    let entry = SortingEntry {
        sorting_id: sorting_id.to_string(),
        sorting_label: sorting_id.to_string(),
        sorting_path,
        sorting_object,
        recording_id: recording_id.to_string(),
        recording_path,
        recording_object,
    };
    append_action(
        feed,
        workspace_name,
        &WorkspaceAction::AddSorting {
            sorting: entry.clone(),
        },
    )?;
    log::info!(
        "Imported sorting {} ({} units) of recording {} into workspace {:?}",
        sorting_id,
        sorting.num_units(),
        recording_id,
        workspace_name
    );
    Ok(entry)
}

/// The current state of a workspace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workspace {
    recordings: BTreeMap<String, RecordingEntry>,
    sortings: BTreeMap<String, SortingEntry>,
}

impl Workspace {
    /// Replay the actions of a workspace. Messages that are not workspace actions are ignored.
    pub fn load(feed: &Feed, workspace_name: &str) -> Result<Self, EphysError> {
        let mut workspace = Workspace::default();
        for message in feed.messages(&workspace_subfeed(workspace_name))? {
            let Some(action) = message.get("action") else {
                continue;
            };
            match serde_json::from_value::<WorkspaceAction>(action.clone()) {
                Ok(action) => workspace.apply(action),
                Err(e) => log::warn!("Skipping invalid workspace action: {}", e),
            }
        }
        Ok(workspace)
    }

    /// Apply an action. Deleting a recording also deletes its sortings.
    pub fn apply(&mut self, action: WorkspaceAction) {
        match action {
            WorkspaceAction::AddRecording { recording } => {
                self.recordings.insert(recording.recording_id.clone(), recording);
            }
            WorkspaceAction::AddSorting { sorting } => {
                self.sortings.insert(sorting.sorting_id.clone(), sorting);
            }
            WorkspaceAction::DeleteRecordings { recording_ids } => {
                for id in recording_ids.iter() {
                    self.recordings.remove(id);
                }
                self.sortings
                    .retain(|_, sorting| !recording_ids.contains(&sorting.recording_id));
            }
            WorkspaceAction::DeleteSortings { sorting_ids } => {
                for id in sorting_ids.iter() {
                    self.sortings.remove(id);
                }
            }
        }
    }

    pub fn recording(&self, recording_id: &str) -> Option<&RecordingEntry> {
        self.recordings.get(recording_id)
    }

    pub fn sorting(&self, sorting_id: &str) -> Option<&SortingEntry> {
        self.sortings.get(sorting_id)
    }

    /// An iterator over the recordings, ordered by id.
    pub fn recordings(&self) -> impl Iterator<Item = &RecordingEntry> + '_ {
        self.recordings.values()
    }

    /// An iterator over the sortings, ordered by id.
    pub fn sortings(&self) -> impl Iterator<Item = &SortingEntry> + '_ {
        self.sortings.values()
    }

    /// The sortings of a recording, ordered by id.
    pub fn sortings_of(&self, recording_id: &str) -> Vec<&SortingEntry> {
        self.sortings
            .values()
            .filter(|sorting| sorting.recording_id == recording_id)
            .collect()
    }
}
