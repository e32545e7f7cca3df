use csv::StringRecord;
use std::io::Read;
use std::path::Path;

use crate::error::Result;

/// A catalog export held fully in memory: header row plus data rows.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogTable {
    pub headers: StringRecord,
    pub rows: Vec<StringRecord>,
}

impl CatalogTable {
    pub fn read(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::parse(file)
    }

    pub fn parse<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        let headers = rdr.headers()?.clone();
        let rows = rdr.records().collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { headers, rows })
    }

    /// Index of the named column, if present.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_cells_and_finds_columns() {
        let csv = "fig_num,name,num_parts,img_url\n\
                   fig-000001,Toy Store Employee,4,https://cdn.example.com/fig-000001.jpg\n\
                   fig-000002,\"Customer Kid, Red\",4,\n";
        let table = CatalogTable::parse(csv.as_bytes()).unwrap();
        assert_eq!(table.column("img_url"), Some(3));
        assert_eq!(table.rows.len(), 2);
        assert_eq!(&table.rows[1][1], "Customer Kid, Red");
        assert_eq!(&table.rows[1][3], "");
        assert_eq!(table.column("missing"), None);
    }
}
