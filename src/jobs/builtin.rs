//! Built-in jobs: snippet preparation and average waveforms.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::recording::{Recording, RecordingObject};
use crate::core::snippets::{prepare_snippets, SnippetConfig};
use crate::core::sorting::{Sorting, SortingObject};
use crate::core::waveform::{
    average_waveform_from_recording, fetch_average_waveform_plot_data, AverageWaveformPlotData,
};
use crate::core::UnitId;
use crate::error::EphysError;
use crate::jobs::registry::JobRegistry;
use crate::jobs::{FunctionJob, JobContext};

pub const PREPARE_SNIPPETS: &str = "prepare_snippets_h5";
pub const FETCH_AVERAGE_WAVEFORM: &str = "fetch_average_waveform_plot_data";
pub const CREATEJOB_FETCH_AVERAGE_WAVEFORM: &str = "createjob_fetch_average_waveform_plot_data";
pub const FETCH_AVERAGE_WAVEFORM_FROM_RECORDING: &str = "fetch_average_waveform_from_recording";

/// Arguments of [`PREPARE_SNIPPETS`]. Parameters left out are taken from the job context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareSnippetsArgs {
    pub recording_object: RecordingObject,
    pub sorting_object: SortingObject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet_len: Option<(usize, usize)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_events_per_unit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_neighborhood_size: Option<usize>,
}

impl PrepareSnippetsArgs {
    fn config(&self, defaults: &SnippetConfig) -> SnippetConfig {
        SnippetConfig {
            snippet_len: self.snippet_len.unwrap_or(defaults.snippet_len),
            max_events_per_unit: self.max_events_per_unit.unwrap_or(defaults.max_events_per_unit),
            max_neighborhood_size: self
                .max_neighborhood_size
                .unwrap_or(defaults.max_neighborhood_size),
            format: defaults.format,
        }
    }
}

/// Arguments of [`FETCH_AVERAGE_WAVEFORM`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchAverageWaveformArgs {
    /// URI (or local path) of a snippet dataset.
    pub snippets_h5: String,
    pub unit_id: UnitId,
}

/// Arguments of the jobs working from a recording and a sorting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitWaveformArgs {
    pub recording_object: RecordingObject,
    pub sorting_object: SortingObject,
    pub unit_id: UnitId,
}

/// Extract the snippets of all units and return the URI of the stored dataset.
pub fn prepare_snippets_job(ctx: &JobContext, args: PrepareSnippetsArgs) -> Result<String, EphysError> {
    let config = args.config(ctx.snippets);
    prepare_snippets(ctx.store, &args.recording_object, &args.sorting_object, &config)
}

pub fn fetch_average_waveform_job(
    ctx: &JobContext,
    args: FetchAverageWaveformArgs,
) -> Result<AverageWaveformPlotData, EphysError> {
    fetch_average_waveform_plot_data(ctx.store, &args.snippets_h5, args.unit_id)
}

/// Prepare the snippets, then compute the average waveform of the unit, both through the registry
/// so that each step is cached on its own.
pub fn createjob_fetch_average_waveform_job(
    ctx: &JobContext,
    args: UnitWaveformArgs,
) -> Result<AverageWaveformPlotData, EphysError> {
    let snippets_h5: String = ctx.call(
        PREPARE_SNIPPETS,
        &PrepareSnippetsArgs {
            recording_object: args.recording_object,
            sorting_object: args.sorting_object,
            snippet_len: None,
            max_events_per_unit: None,
            max_neighborhood_size: None,
        },
    )?;
    ctx.call(
        FETCH_AVERAGE_WAVEFORM,
        &FetchAverageWaveformArgs {
            snippets_h5,
            unit_id: args.unit_id,
        },
    )
}

/// Compute the average waveform of the unit over the first seconds of the recording.
pub fn fetch_average_waveform_from_recording_job(
    ctx: &JobContext,
    args: UnitWaveformArgs,
) -> Result<AverageWaveformPlotData, EphysError> {
    let recording = Recording::load(ctx.store, &args.recording_object)?;
    let sorting = Sorting::load(ctx.store, &args.sorting_object)?;
    average_waveform_from_recording(&recording, &sorting, args.unit_id, ctx.snippets)
}

/// The snippet parameters of the context, which the snippet-based jobs depend on.
fn snippet_context(ctx: &JobContext) -> Result<Value, EphysError> {
    Ok(serde_json::to_value(ctx.snippets)?)
}

/// Register all built-in jobs.
pub fn register_builtins(registry: &mut JobRegistry) -> Result<(), EphysError> {
    registry.register(
        FunctionJob::new(PREPARE_SNIPPETS, "0.2.0", prepare_snippets_job).with_context(snippet_context),
    )?;
    registry.register(FunctionJob::new(
        FETCH_AVERAGE_WAVEFORM,
        "0.2.1",
        fetch_average_waveform_job,
    ))?;
    registry.register(
        FunctionJob::new(
            CREATEJOB_FETCH_AVERAGE_WAVEFORM,
            "0.1.0",
            createjob_fetch_average_waveform_job,
        )
        .with_context(snippet_context),
    )?;
    registry.register(
        FunctionJob::new(
            FETCH_AVERAGE_WAVEFORM_FROM_RECORDING,
            "0.1.14",
            fetch_average_waveform_from_recording_job,
        )
        .with_context(snippet_context),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::recording::SampleDtype;
    use crate::core::snippets::SnippetDataset;
    use crate::jobs::cache::JobCache;
    use crate::storage::content::ContentStore;
    use ndarray::Array2;
    use serde_json::json;
    use std::collections::BTreeMap;

    /// Two channels, unit 1 fires a negative spike on channel 1, unit 2 never fires.
    fn objects(store: &ContentStore) -> (RecordingObject, SortingObject) {
        let frames: Vec<u64> = vec![20, 60, 100];
        let mut traces = Array2::<f32>::zeros((2, 150));
        for &f in frames.iter() {
            traces[[1, f as usize]] = -40.0;
            traces[[0, f as usize]] = 10.0;
        }
        let recording = Recording::build(
            vec![3, 7],
            vec![[0.0, 0.0], [0.0, 20.0]],
            1000.0,
            traces,
            SampleDtype::Int16,
        )
        .unwrap();
        let sorting = Sorting::build(1000.0, BTreeMap::from([(1, frames), (2, vec![])])).unwrap();
        (recording.save(store).unwrap(), sorting.save(store).unwrap())
    }

    fn snippet_config() -> SnippetConfig {
        SnippetConfig {
            snippet_len: (5, 10),
            ..SnippetConfig::default()
        }
    }

    #[test]
    fn test_builtins() {
        let registry = JobRegistry::with_builtins().unwrap();
        let versions: Vec<(String, String)> = registry
            .signatures()
            .into_iter()
            .map(|s| (s.name, s.version))
            .collect();
        assert_eq!(
            versions,
            vec![
                (CREATEJOB_FETCH_AVERAGE_WAVEFORM.to_string(), "0.1.0".to_string()),
                (FETCH_AVERAGE_WAVEFORM_FROM_RECORDING.to_string(), "0.1.14".to_string()),
                (FETCH_AVERAGE_WAVEFORM.to_string(), "0.2.1".to_string()),
                (PREPARE_SNIPPETS.to_string(), "0.2.0".to_string()),
            ]
        );
    }

    #[test]
    fn test_prepare_and_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();
        let registry = JobRegistry::with_builtins().unwrap();
        let config = snippet_config();
        let ctx = JobContext::new(&registry, &store, &config);
        let (recording_object, sorting_object) = objects(&store);

        let uri = ctx
            .run(
                PREPARE_SNIPPETS,
                json!({"recording_object": recording_object, "sorting_object": sorting_object}),
            )
            .unwrap();
        let uri = uri.as_str().unwrap();

        let plot_data = ctx
            .run(FETCH_AVERAGE_WAVEFORM, json!({"snippets_h5": uri, "unit_id": 1}))
            .unwrap();
        let mut expected = vec![0.0; 15];
        expected[5] = -40.0;
        assert_eq!(plot_data, json!({"channel_id": 7, "average_waveform": expected}));

        let plot_data = ctx
            .run(FETCH_AVERAGE_WAVEFORM, json!({"snippets_h5": uri, "unit_id": 2}))
            .unwrap();
        assert_eq!(plot_data, json!({"channel_id": null, "average_waveform": null}));

        assert_eq!(
            ctx.run(FETCH_AVERAGE_WAVEFORM, json!({"snippets_h5": uri, "unit_id": 9})),
            Err(EphysError::UnitNotFound(9))
        );
        assert!(matches!(
            ctx.run(FETCH_AVERAGE_WAVEFORM, json!({"unit_id": 1})),
            Err(EphysError::InvalidJobArguments { .. })
        ));
    }

    #[test]
    fn test_createjob_matches_direct_computation() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path().join("store")).unwrap();
        let cache = JobCache::new(dir.path().join("cache")).unwrap();
        let registry = JobRegistry::with_builtins().unwrap();
        let config = snippet_config();
        let ctx = JobContext::new(&registry, &store, &config).with_cache(&cache);
        let (recording_object, sorting_object) = objects(&store);

        let args = UnitWaveformArgs {
            recording_object,
            sorting_object,
            unit_id: 1,
        };
        let chained: AverageWaveformPlotData = ctx.call(CREATEJOB_FETCH_AVERAGE_WAVEFORM, &args).unwrap();
        let direct: AverageWaveformPlotData = ctx.call(FETCH_AVERAGE_WAVEFORM_FROM_RECORDING, &args).unwrap();
        assert_eq!(chained, direct);
        assert_eq!(chained.channel_id, Some(7));

        // every step is cached
        let cached: AverageWaveformPlotData = ctx.call(CREATEJOB_FETCH_AVERAGE_WAVEFORM, &args).unwrap();
        assert_eq!(cached, chained);
        let num_entries = walk_files(cache.dir());
        assert_eq!(num_entries, 4);

        let args = UnitWaveformArgs { unit_id: 2, ..args };
        let empty: AverageWaveformPlotData = ctx.call(FETCH_AVERAGE_WAVEFORM_FROM_RECORDING, &args).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_cache_depends_on_snippet_config() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path().join("store")).unwrap();
        let cache = JobCache::new(dir.path().join("cache")).unwrap();
        let registry = JobRegistry::with_builtins().unwrap();
        let (recording_object, sorting_object) = objects(&store);
        let prepare_args = PrepareSnippetsArgs {
            recording_object: recording_object.clone(),
            sorting_object: sorting_object.clone(),
            snippet_len: None,
            max_events_per_unit: None,
            max_neighborhood_size: None,
        };
        let unit_args = UnitWaveformArgs {
            recording_object,
            sorting_object,
            unit_id: 1,
        };

        let short = snippet_config();
        let long = SnippetConfig {
            snippet_len: (20, 40),
            ..SnippetConfig::default()
        };
        for (config, num_samples) in [(&short, 15), (&long, 60), (&short, 15)] {
            let ctx = JobContext::new(&registry, &store, config).with_cache(&cache);

            let uri: String = ctx.call(PREPARE_SNIPPETS, &prepare_args).unwrap();
            let dataset = SnippetDataset::read(store.load_file(&uri).unwrap()).unwrap();
            assert_eq!(dataset.unit(1).unwrap().waveforms().shape()[2], num_samples);

            let chained: AverageWaveformPlotData = ctx.call(CREATEJOB_FETCH_AVERAGE_WAVEFORM, &unit_args).unwrap();
            assert_eq!(chained.average_waveform.unwrap().len(), num_samples);
            let direct: AverageWaveformPlotData =
                ctx.call(FETCH_AVERAGE_WAVEFORM_FROM_RECORDING, &unit_args).unwrap();
            assert_eq!(direct.average_waveform.unwrap().len(), num_samples);
        }
    }

    #[test]
    fn test_prepare_snippets_far_frames() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();
        let registry = JobRegistry::with_builtins().unwrap();
        let config = snippet_config();
        let ctx = JobContext::new(&registry, &store, &config);

        let (recording_object, _) = objects(&store);
        let sorting = Sorting::build(1000.0, BTreeMap::from([(1, vec![20, u64::MAX - 3])])).unwrap();
        let args = PrepareSnippetsArgs {
            recording_object,
            sorting_object: sorting.save(&store).unwrap(),
            snippet_len: None,
            max_events_per_unit: None,
            max_neighborhood_size: None,
        };
        let uri: String = ctx.call(PREPARE_SNIPPETS, &args).unwrap();
        let dataset = SnippetDataset::read(store.load_file(&uri).unwrap()).unwrap();
        assert_eq!(dataset.unit(1).unwrap().num_events(), 1);
    }

    fn walk_files(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    walk_files(&path)
                } else {
                    1
                }
            })
            .sum()
    }
}
