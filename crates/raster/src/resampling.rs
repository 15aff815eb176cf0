use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Resampling kinds supported by the tile pipeline.
///
/// `Linear` is the bilinear kernel; the string form is "linear" for
/// compatibility with the configuration surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resampling {
    #[default]
    Nearest,
    Linear,
    Cubic,
    Average,
}

impl Resampling {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resampling::Nearest => "nearest",
            Resampling::Linear => "linear",
            Resampling::Cubic => "cubic",
            Resampling::Average => "average",
        }
    }

    pub(crate) fn to_read_alg(self) -> gdal::raster::ResampleAlg {
        match self {
            Resampling::Nearest => gdal::raster::ResampleAlg::NearestNeighbour,
            Resampling::Linear => gdal::raster::ResampleAlg::Bilinear,
            Resampling::Cubic => gdal::raster::ResampleAlg::Cubic,
            Resampling::Average => gdal::raster::ResampleAlg::Average,
        }
    }

    pub(crate) fn to_warp_alg(self) -> gdal_sys::GDALResampleAlg::Type {
        match self {
            Resampling::Nearest => gdal_sys::GDALResampleAlg::GRA_NearestNeighbour,
            Resampling::Linear => gdal_sys::GDALResampleAlg::GRA_Bilinear,
            Resampling::Cubic => gdal_sys::GDALResampleAlg::GRA_Cubic,
            Resampling::Average => gdal_sys::GDALResampleAlg::GRA_Average,
        }
    }
}

impl FromStr for Resampling {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nearest" => Ok(Resampling::Nearest),
            "linear" => Ok(Resampling::Linear),
            "cubic" => Ok(Resampling::Cubic),
            "average" => Ok(Resampling::Average),
            _ => Err(Error::UnsupportedResampling(s.to_string())),
        }
    }
}

impl fmt::Display for Resampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_methods() {
        assert_eq!("nearest".parse::<Resampling>().unwrap(), Resampling::Nearest);
        assert_eq!("linear".parse::<Resampling>().unwrap(), Resampling::Linear);
        assert_eq!("cubic".parse::<Resampling>().unwrap(), Resampling::Cubic);
        assert_eq!("average".parse::<Resampling>().unwrap(), Resampling::Average);
    }

    #[test]
    fn parse_unknown_method() {
        let err = "lanczos".parse::<Resampling>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedResampling(m) if m == "lanczos"));
    }
}
