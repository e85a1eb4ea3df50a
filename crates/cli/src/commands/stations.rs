// Station catalogue command

use anyhow::Result;
use stationflow_pipeline::Orchestrator;

use crate::output::{print_table_header, print_table_row, OutputFormat};

pub fn run(orchestrator: &Orchestrator, output: OutputFormat) -> Result<()> {
    let stations = orchestrator.get_station_details();

    if !output.is_text() {
        return output.print_value(&stations);
    }

    if stations.is_empty() {
        println!("No stations found");
        return Ok(());
    }

    print_table_header(&[("ID", 12), ("NAME", 12), ("KIND", 12), ("DESCRIPTION", 30)]);
    for station in &stations {
        print_table_row(&[
            (&station.id, 12),
            (&station.name, 12),
            (&station.kind.to_string(), 12),
            (&station.description, 30),
        ]);
    }

    Ok(())
}
