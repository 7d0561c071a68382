#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterType {
    None,
    Sub,
    Up,
    Average,
    Paeth,
}

impl FilterType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(FilterType::None),
            1 => Some(FilterType::Sub),
            2 => Some(FilterType::Up),
            3 => Some(FilterType::Average),
            4 => Some(FilterType::Paeth),
            _ => None,
        }
    }
}

/// Reverses `filter` on `current` in place. `previous` is the already
/// unfiltered row above (all zeros for the first row); `bpp` is the
/// left-neighbour distance in bytes, never less than 1.
pub fn unfilter(filter: FilterType, bpp: usize, previous: &[u8], current: &mut [u8]) {
    debug_assert_eq!(previous.len(), current.len());
    let len = current.len();
    match filter {
        FilterType::None => {}
        FilterType::Sub => {
            for i in bpp..len {
                current[i] = current[i].wrapping_add(current[i - bpp]);
            }
        }
        FilterType::Up => {
            for (byte, above) in current.iter_mut().zip(previous) {
                *byte = byte.wrapping_add(*above);
            }
        }
        FilterType::Average => {
            for i in 0..len {
                let left = if i >= bpp { current[i - bpp] } else { 0 };
                let average = (u16::from(left) + u16::from(previous[i])) / 2;
                current[i] = current[i].wrapping_add(average as u8);
            }
        }
        FilterType::Paeth => {
            for i in 0..len {
                let (left, upper_left) = if i >= bpp {
                    (current[i - bpp], previous[i - bpp])
                } else {
                    (0, 0)
                };
                current[i] = current[i].wrapping_add(paeth_predictor(left, previous[i], upper_left));
            }
        }
    }
}

pub fn paeth_predictor(left: u8, above: u8, upper_left: u8) -> u8 {
    let a = i16::from(left);
    let b = i16::from(above);
    let c = i16::from(upper_left);
    let p = a + b - c;
    let pa = (p - a).abs();
    let pb = (p - b).abs();
    let pc = (p - c).abs();
    if pa <= pb && pa <= pc {
        left
    } else if pb <= pc {
        above
    } else {
        upper_left
    }
}
