//! Integration test: write synthetic stores and read them back lazily.

use chrono::NaiveDate;
use grid_store::testdata::{test_coords, DailyStoreBuilder};
use grid_store::time::daily_dates;
use grid_store::{
    LazyDataset, StoreError, StoreGroup, StoreLocator, TileWindow, Units,
};
use test_utils::{assert_approx_eq, ramp_series, temp_test_dir};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn test_force_tile_reads_window_and_tile() {
    let dir = temp_test_dir();
    let path = dir.path().join("temperature.zarr");
    let dates = daily_dates(2001, 2002).unwrap();
    let coords = test_coords(4, 5);

    // value = day index * 100 + row * 10 + col
    DailyStoreBuilder::new(coords.clone(), dates.clone())
        .spatial_chunk(2)
        .variable_fn("tmax", Units::Celsius, |d, row, col| {
            let t = (d - date(2001, 1, 1)).num_days() as f32;
            t * 100.0 + row as f32 * 10.0 + col as f32
        })
        .write(&path)
        .unwrap();

    let dataset = LazyDataset::open(&path).unwrap();
    assert_eq!(dataset.coords(), &coords);
    assert_eq!(dataset.dates().len(), 730);
    assert_eq!(dataset.native_tile().unwrap(), (2, 2));

    let window = dataset
        .select_time(date(2002, 1, 1), date(2002, 12, 31))
        .unwrap();
    assert_eq!(window.dates().len(), 365);
    assert_eq!(window.dates()[0], date(2002, 1, 1));

    let grids = window.canonical().unwrap();
    let tasmax = &grids["tasmax"];
    let tile = TileWindow {
        lat_start: 1,
        lat_len: 2,
        lon_start: 3,
        lon_len: 2,
    };
    let series = tasmax.force_tile(tile).unwrap();
    assert_eq!(series.data.len(), 365 * 4);
    assert_eq!(series.units, Units::Celsius);
    // First day of 2002 is day index 365.
    assert_approx_eq!(series.get(0, 0, 0), 365.0 * 100.0 + 10.0 + 3.0, 1e-3);
    assert_approx_eq!(series.get(1, 1, 1), 366.0 * 100.0 + 20.0 + 4.0, 1e-3);
}

#[test]
fn test_kelvin_normalized_and_tas_derived() {
    let dir = temp_test_dir();
    let path = dir.path().join("temperature.zarr");
    let dates = daily_dates(2001, 2001).unwrap();
    let n = dates.len();

    DailyStoreBuilder::new(test_coords(1, 1), dates)
        .uniform_series("tasmax", Units::Kelvin, &ramp_series(n, 293.15, 0.0))
        .uniform_series("tasmin", Units::Kelvin, &ramp_series(n, 283.15, 0.0))
        .write(&path)
        .unwrap();

    let dataset = LazyDataset::open(&path).unwrap();
    let grids = dataset.canonical().unwrap();
    assert!(grids["tas"].is_derived());

    let tile = dataset.coords().full_tile();
    let tasmax = grids["tasmax"].force_tile(tile).unwrap();
    assert_eq!(grids["tasmax"].source_units(), &Units::Kelvin);
    assert_approx_eq!(tasmax.data[0], 20.0, 1e-3);

    let tas = grids["tas"].force_tile(tile).unwrap();
    assert_eq!(tas.units, Units::Celsius);
    assert_approx_eq!(tas.data[100], 15.0, 1e-3);

    // Raw access leaves values untouched.
    let raw = dataset.variable("tasmax").unwrap().force_tile(tile).unwrap();
    assert_approx_eq!(raw.data[0], 293.15, 1e-3);
}

#[test]
fn test_precipitation_aliases_and_flux() {
    let dir = temp_test_dir();
    let path = dir.path().join("precipitation.zarr");
    let dates = daily_dates(2001, 2001).unwrap();
    let n = dates.len();

    DailyStoreBuilder::new(test_coords(1, 1), dates)
        .uniform_series(
            "prcp",
            Units::KgPerSquareMeterPerSecond,
            &ramp_series(n, 10.0 / 86_400.0, 0.0),
        )
        .write(&path)
        .unwrap();

    let dataset = LazyDataset::open(&path).unwrap();
    let grids = dataset.canonical().unwrap();
    let pr = grids["pr"].force_tile(dataset.coords().full_tile()).unwrap();
    assert_eq!(pr.units, Units::MillimetersPerDay);
    assert_approx_eq!(pr.data[0], 10.0, 1e-3);
}

#[test]
fn test_empty_time_selection() {
    let dir = temp_test_dir();
    let path = dir.path().join("t.zarr");
    DailyStoreBuilder::new(test_coords(1, 1), daily_dates(2001, 2001).unwrap())
        .uniform_series("tasmax", Units::Celsius, &[1.0; 365])
        .write(&path)
        .unwrap();

    let dataset = LazyDataset::open(&path).unwrap();
    let err = dataset
        .select_time(date(1990, 1, 1), date(1990, 12, 31))
        .err()
        .unwrap();
    assert!(matches!(err, StoreError::EmptySelection { .. }));
}

#[test]
fn test_locator_opens_resolved_stores() {
    let dir = temp_test_dir();
    let dates = daily_dates(2001, 2001).unwrap();
    for (group, var, units) in [
        ("temperature", "tasmax", Units::Celsius),
        ("precipitation", "pr", Units::MillimetersPerDay),
    ] {
        DailyStoreBuilder::new(test_coords(2, 2), dates.clone())
            .uniform_series(var, units, &[1.0; 365])
            .write(&dir.path().join("zarr").join(format!("{group}.zarr")))
            .unwrap();
    }

    let stores = StoreLocator::new(dir.path())
        .open(&[StoreGroup::Temperature, StoreGroup::Precipitation])
        .unwrap();
    assert_eq!(stores.len(), 2);
    assert_eq!(
        stores[&StoreGroup::Precipitation].variables(),
        vec!["pr".to_string()]
    );
}

#[test]
fn test_rewrite_replaces_archive() {
    let dir = temp_test_dir();
    let path = dir.path().join("t.zarr");
    let dates = daily_dates(2001, 2001).unwrap();

    DailyStoreBuilder::new(test_coords(1, 1), dates.clone())
        .uniform_series("tasmax", Units::Celsius, &[1.0; 365])
        .write(&path)
        .unwrap();
    DailyStoreBuilder::new(test_coords(1, 1), dates)
        .uniform_series("tasmin", Units::Celsius, &[2.0; 365])
        .write(&path)
        .unwrap();

    let dataset = LazyDataset::open(&path).unwrap();
    assert_eq!(dataset.variables(), vec!["tasmin".to_string()]);
    assert!(!path.join("tasmax").exists());
    let entries = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(entries, 1);
}
