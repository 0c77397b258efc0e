use crate::error::GeometryError;
use crate::geo::LatLon;
use crate::models::GeofenceGeometry;

use super::validate;

const LON_HEADERS: [&str; 3] = ["lon", "lng", "longitude"];
const LAT_HEADERS: [&str; 2] = ["lat", "latitude"];

/// Builds a polygon geofence from imported CSV rows.
///
/// The first non-blank row must be the header `lon,lat` (`lng` and the long
/// spellings are accepted, case-insensitive). Every following non-blank row
/// is one vertex. Line numbers in errors are 1-based.
pub fn parse_csv_polygon<I, S>(rows: I) -> Result<GeofenceGeometry, GeometryError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut lines = rows
        .into_iter()
        .enumerate()
        .map(|(i, row)| (i + 1, row.as_ref().trim_start_matches('\u{feff}').trim().to_string()))
        .filter(|(_, row)| !row.is_empty());

    let (header_line, header) = lines.next().ok_or_else(|| GeometryError::MalformedCsv {
        line: 1,
        reason: "missing header, expected `lon,lat`".to_string(),
    })?;
    check_header(header_line, &header)?;

    let mut path = Vec::new();
    for (line, row) in lines {
        path.push(parse_row(line, &row)?);
    }

    if path.len() < 3 {
        return Err(GeometryError::InsufficientPoints { found: path.len() });
    }

    let geometry = GeofenceGeometry::polygon(path);
    validate(&geometry)?;
    Ok(geometry)
}

fn check_header(line: usize, header: &str) -> Result<(), GeometryError> {
    let columns: Vec<String> = header.split(',').map(clean_cell).collect();
    let valid = columns.len() == 2
        && LON_HEADERS.contains(&columns[0].as_str())
        && LAT_HEADERS.contains(&columns[1].as_str());
    if valid {
        Ok(())
    } else {
        Err(GeometryError::MalformedCsv {
            line,
            reason: format!("expected header `lon,lat`, found `{}`", header),
        })
    }
}

fn parse_row(line: usize, row: &str) -> Result<LatLon, GeometryError> {
    let cells: Vec<String> = row.split(',').map(clean_cell).collect();
    if cells.len() != 2 {
        return Err(GeometryError::MalformedCsv {
            line,
            reason: format!("expected 2 columns, found {}", cells.len()),
        });
    }
    let parse = |cell: &str, name: &str| {
        cell.parse::<f64>().map_err(|_| GeometryError::MalformedCsv {
            line,
            reason: format!("{} `{}` is not a number", name, cell),
        })
    };
    let lon = parse(cells[0].as_str(), "longitude")?;
    let lat = parse(cells[1].as_str(), "latitude")?;
    Ok(LatLon::new(lat, lon))
}

fn clean_cell(cell: &str) -> String {
    cell.trim().trim_matches('"').trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_lon_lat_rows() {
        let csv = "lon,lat\n-99.10,19.40\n-99.12,19.41\n\n-99.11,19.43\n";
        let geometry = parse_csv_polygon(csv.lines()).unwrap();
        match geometry {
            GeofenceGeometry::Polygon { path } => {
                assert_eq!(path.len(), 3);
                assert_eq!(path[0], LatLon::new(19.40, -99.10));
            }
            other => panic!("expected polygon, got {:?}", other),
        }
    }

    #[test]
    fn test_header_aliases_and_quotes() {
        let rows = vec!["\u{feff}\"Longitude\",\"Latitude\"", "1,1", "2,1", "2,2"];
        assert!(parse_csv_polygon(rows).is_ok());
    }

    #[test]
    fn test_two_rows_is_insufficient() {
        let err = parse_csv_polygon("lon,lat\n1,1\n2,2".lines()).unwrap_err();
        assert_eq!(err, GeometryError::InsufficientPoints { found: 2 });
    }

    #[test]
    fn test_misordered_header_is_malformed() {
        let err = parse_csv_polygon("lat,lon\n1,1\n2,2\n3,3".lines()).unwrap_err();
        assert!(matches!(err, GeometryError::MalformedCsv { line: 1, .. }));
    }

    #[test]
    fn test_missing_header_is_malformed() {
        let err = parse_csv_polygon("1,1\n2,2\n3,3\n4,4".lines()).unwrap_err();
        assert!(matches!(err, GeometryError::MalformedCsv { line: 1, .. }));

        let empty: Vec<&str> = Vec::new();
        assert!(matches!(
            parse_csv_polygon(empty),
            Err(GeometryError::MalformedCsv { .. })
        ));
    }

    #[test]
    fn test_bad_number_reports_line() {
        let err = parse_csv_polygon("lon,lat\n1,1\n2,abc\n3,3".lines()).unwrap_err();
        match err {
            GeometryError::MalformedCsv { line, reason } => {
                assert_eq!(line, 3);
                assert!(reason.contains("latitude"), "{}", reason);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_out_of_range_vertex_is_invalid_geometry() {
        let err = parse_csv_polygon("lon,lat\n1,1\n2,95\n3,3".lines()).unwrap_err();
        assert!(matches!(err, GeometryError::InvalidGeometry { ref field, .. } if field == "path[1].lat"));
    }
}
