use std::path::Path;

use rusty_ephys::core::recording::Recording;
use rusty_ephys::core::simulation::{simulate, SimulationConfig};
use rusty_ephys::core::snippets::{SnippetConfig, SnippetDataset};
use rusty_ephys::core::sorting::Sorting;
use rusty_ephys::core::waveform::AverageWaveformPlotData;
use rusty_ephys::feed::Feed;
use rusty_ephys::jobs::builtin::{
    FetchAverageWaveformArgs, PrepareSnippetsArgs, UnitWaveformArgs, CREATEJOB_FETCH_AVERAGE_WAVEFORM,
    FETCH_AVERAGE_WAVEFORM, FETCH_AVERAGE_WAVEFORM_FROM_RECORDING, PREPARE_SNIPPETS,
};
use rusty_ephys::jobs::cache::JobCache;
use rusty_ephys::jobs::registry::{JobCall, JobRegistry};
use rusty_ephys::jobs::JobContext;
use rusty_ephys::storage::content::ContentStore;
use rusty_ephys::workspace::{import_recording, import_sorting, workspace_subfeed, Workspace};

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let path = entry.unwrap().path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}

#[test]
fn test_simulate_import_and_average() {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::new(dir.path().join("store")).unwrap();
    let cache = JobCache::new(dir.path().join("cache")).unwrap();
    let feed = Feed::load(dir.path().join("feeds"), "labbox-ephys-default", true).unwrap();

    let config = SimulationConfig {
        duration_sec: 10.0,
        ..SimulationConfig::default()
    };
    let (recording, sorting) = simulate(&config).unwrap();
    assert_eq!(recording.num_channels(), 8);
    assert_eq!(sorting.unit_ids(), vec![1, 2, 3, 4, 5]);

    import_recording(&feed, &store, "default", &recording, "rec1").unwrap();
    import_sorting(&feed, &store, "default", &recording, &sorting, "rec1", "rec1:true").unwrap();
    assert_eq!(feed.num_messages(&workspace_subfeed("default")).unwrap(), 2);

    // everything needed downstream can be recovered from the feed and the store
    let workspace = Workspace::load(&feed, "default").unwrap();
    let entry = workspace.sorting("rec1:true").unwrap();
    assert_eq!(entry.recording_id, "rec1");
    assert_eq!(Recording::load(&store, &entry.recording_object).unwrap(), recording);
    assert_eq!(Sorting::load(&store, &entry.sorting_object).unwrap(), sorting);

    let registry = JobRegistry::with_builtins().unwrap();
    let snippets = SnippetConfig::default();
    let ctx = JobContext::new(&registry, &store, &snippets).with_cache(&cache);

    let snippets_h5: String = ctx
        .call(
            PREPARE_SNIPPETS,
            &PrepareSnippetsArgs {
                recording_object: entry.recording_object.clone(),
                sorting_object: entry.sorting_object.clone(),
                snippet_len: None,
                max_events_per_unit: None,
                max_neighborhood_size: None,
            },
        )
        .unwrap();
    let dataset = SnippetDataset::read(store.load_file(&snippets_h5).unwrap()).unwrap();
    assert_eq!(dataset.unit_ids(), sorting.unit_ids());

    for unit_id in sorting.unit_ids() {
        let from_snippets: AverageWaveformPlotData = ctx
            .call(
                FETCH_AVERAGE_WAVEFORM,
                &FetchAverageWaveformArgs {
                    snippets_h5: snippets_h5.clone(),
                    unit_id,
                },
            )
            .unwrap();
        let args = UnitWaveformArgs {
            recording_object: entry.recording_object.clone(),
            sorting_object: entry.sorting_object.clone(),
            unit_id,
        };
        let chained: AverageWaveformPlotData = ctx.call(CREATEJOB_FETCH_AVERAGE_WAVEFORM, &args).unwrap();
        let from_recording: AverageWaveformPlotData =
            ctx.call(FETCH_AVERAGE_WAVEFORM_FROM_RECORDING, &args).unwrap();

        assert_eq!(chained, from_snippets);
        // the recording is shorter than the averaging window and all channels fit in a neighborhood
        assert_eq!(from_recording, from_snippets);
        assert_eq!(dataset.average_waveform(unit_id).unwrap(), from_snippets);

        let channel_id = from_snippets.channel_id.unwrap();
        assert!(recording.channel_ids().contains(&channel_id));
        assert_eq!(from_snippets.average_waveform.unwrap().len(), 130);
    }

    // prepare (1) + per unit: fetch, createjob, from recording (3 x 5)
    assert_eq!(count_files(cache.dir()), 16);
}

#[test]
fn test_batch_of_units() {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::new(dir.path()).unwrap();

    let config = SimulationConfig {
        duration_sec: 5.0,
        num_channels: 4,
        num_units: 3,
        seed: 7,
        ..SimulationConfig::default()
    };
    let (recording, sorting) = simulate(&config).unwrap();
    let recording_object = recording.save(&store).unwrap();
    let sorting_object = sorting.save(&store).unwrap();

    let registry = JobRegistry::with_builtins().unwrap();
    let snippets = SnippetConfig::default();
    let ctx = JobContext::new(&registry, &store, &snippets);

    let calls: Vec<JobCall> = [1, 2, 3, 42]
        .iter()
        .map(|&unit_id| JobCall {
            name: FETCH_AVERAGE_WAVEFORM_FROM_RECORDING.to_string(),
            args: serde_json::to_value(UnitWaveformArgs {
                recording_object: recording_object.clone(),
                sorting_object: sorting_object.clone(),
                unit_id,
            })
            .unwrap(),
        })
        .collect();
    let results = registry.run_batch(&calls, &ctx);
    assert_eq!(results.len(), 4);
    for result in results.iter().take(3) {
        let plot_data: AverageWaveformPlotData = serde_json::from_value(result.as_ref().unwrap().clone()).unwrap();
        assert!(plot_data.channel_id.is_some());
    }
    assert!(results[3].is_err());
}
